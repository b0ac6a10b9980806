use crate::error::AssemblyError;
use crate::integrators::{
    AssemblyVariant, Integrator, IntegratorContext, IntegratorDescription, ReferenceIntegrator, TensorIntegrator,
    WeakFormKind,
};
use crate::Real;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;

/// Creates a device-specialized integrator from its description.
pub type IntegratorConstructor<T> = for<'a> fn(
    &IntegratorDescription<T>,
    &IntegratorContext<'a, T>,
) -> Result<Box<dyn Integrator<T> + 'a>, AssemblyError>;

/// Maps pairs of weak form and assembly variant to integrator constructors.
#[derive(Clone)]
pub struct IntegratorRegistry<T: Real> {
    constructors: HashMap<(WeakFormKind, AssemblyVariant), IntegratorConstructor<T>>,
}

impl<T: Real> Debug for IntegratorRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.constructors.keys().collect();
        keys.sort();
        f.debug_struct("IntegratorRegistry")
            .field("constructors", &keys)
            .finish()
    }
}

impl<T: Real> Default for IntegratorRegistry<T> {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn reference<'a, T: Real>(
    description: &IntegratorDescription<T>,
    context: &IntegratorContext<'a, T>,
) -> Result<Box<dyn Integrator<T> + 'a>, AssemblyError> {
    Ok(Box::new(ReferenceIntegrator::new(description, context)))
}

fn tensor<'a, T: Real>(
    description: &IntegratorDescription<T>,
    context: &IntegratorContext<'a, T>,
) -> Result<Box<dyn Integrator<T> + 'a>, AssemblyError> {
    Ok(Box::new(TensorIntegrator::new(description, context)?))
}

impl<T: Real> IntegratorRegistry<T> {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with the integrators shipped with this crate.
    ///
    /// Mass and diffusion are available for both variants. Advection is only available for
    /// [`AssemblyVariant::Reference`].
    pub fn with_builtin() -> Self {
        use AssemblyVariant::{Reference, Tensor};
        use WeakFormKind::{Advection, Diffusion, Mass};
        let mut registry = Self::empty();
        registry.register(Mass, Reference, reference::<T>);
        registry.register(Mass, Tensor, tensor::<T>);
        registry.register(Diffusion, Reference, reference::<T>);
        registry.register(Diffusion, Tensor, tensor::<T>);
        registry.register(Advection, Reference, reference::<T>);
        registry
    }

    /// Registers a constructor, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: WeakFormKind,
        variant: AssemblyVariant,
        constructor: IntegratorConstructor<T>,
    ) -> Option<IntegratorConstructor<T>> {
        self.constructors.insert((kind, variant), constructor)
    }

    pub fn contains(&self, kind: WeakFormKind, variant: AssemblyVariant) -> bool {
        self.constructors.contains_key(&(kind, variant))
    }

    /// Constructs the integrator registered for the kind of `description` and `variant`.
    ///
    /// Fails with [`AssemblyError::UnknownIntegrator`] if the kind is not registered for any
    /// variant, and with [`AssemblyError::UnsupportedVariant`] if it is registered, but not for
    /// the requested variant.
    pub fn resolve<'a>(
        &self,
        description: &IntegratorDescription<T>,
        variant: AssemblyVariant,
        context: &IntegratorContext<'a, T>,
    ) -> Result<Box<dyn Integrator<T> + 'a>, AssemblyError> {
        let kind = description.kind();
        match self.constructors.get(&(kind, variant)) {
            Some(constructor) => constructor(description, context),
            None if self.constructors.keys().any(|(k, _)| *k == kind) => {
                Err(AssemblyError::UnsupportedVariant { kind, variant })
            }
            None => Err(AssemblyError::UnknownIntegrator { kind }),
        }
    }
}

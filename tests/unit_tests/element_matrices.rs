use fenris_assembly::engine::{Engine, EngineConfig};
use fenris_assembly::form::BilinearForm;
use fenris_assembly::integrators::{
    AssemblyVariant, Integrator, IntegratorContext, IntegratorDescription, IntegratorRegistry, WeakFormKind,
};
use fenris_assembly::nalgebra::DMatrix;
use fenris_assembly::space::{FiniteElementSpace, IntervalSpace};
use fenris_assembly::nalgebra_sparse::CooMatrix;
use fenris_assembly::AssemblyError;
use matrixcompare::assert_matrix_eq;
use std::sync::atomic::{AtomicUsize, Ordering};

fn reference_engine() -> Engine {
    Engine::new(EngineConfig {
        variant: AssemblyVariant::Reference,
        ..EngineConfig::default()
    })
}

/// Contributes the same 2x2 block on every element.
#[derive(Debug)]
struct FixedBlock {
    kind: WeakFormKind,
    block: [f64; 4],
    num_elements: usize,
}

impl Integrator<f64> for FixedBlock {
    fn kind(&self) -> WeakFormKind {
        self.kind
    }

    fn supports_element_matrices(&self) -> bool {
        true
    }

    fn add_element_matrices(&self, output: &mut [f64]) -> Result<(), AssemblyError> {
        assert_eq!(output.len(), 4 * self.num_elements);
        for chunk in output.chunks_mut(4) {
            for (out, value) in chunk.iter_mut().zip(&self.block) {
                *out += value;
            }
        }
        Ok(())
    }

    fn add_mult(&self, x: &[f64], y: &mut [f64]) -> Result<(), AssemblyError> {
        for (x_e, y_e) in x.chunks(2).zip(y.chunks_mut(2)) {
            y_e[0] += self.block[0] * x_e[0] + self.block[1] * x_e[1];
            y_e[1] += self.block[2] * x_e[0] + self.block[3] * x_e[1];
        }
        Ok(())
    }
}

fn identity_block<'a>(
    description: &IntegratorDescription<f64>,
    context: &IntegratorContext<'a, f64>,
) -> Result<Box<dyn Integrator<f64> + 'a>, AssemblyError> {
    Ok(Box::new(FixedBlock {
        kind: description.kind(),
        block: [1.0, 0.0, 0.0, 1.0],
        num_elements: context.test().num_elements(),
    }))
}

fn swap_block<'a>(
    description: &IntegratorDescription<f64>,
    context: &IntegratorContext<'a, f64>,
) -> Result<Box<dyn Integrator<f64> + 'a>, AssemblyError> {
    Ok(Box::new(FixedBlock {
        kind: description.kind(),
        block: [0.0, 1.0, 1.0, 0.0],
        num_elements: context.test().num_elements(),
    }))
}

#[test]
fn element_matrices_of_integrators_are_summed() {
    let engine = reference_engine();
    let space = IntervalSpace::uniform(&engine, 2, 1.0);
    let mut registry = IntegratorRegistry::empty();
    registry.register(WeakFormKind::Mass, AssemblyVariant::Reference, identity_block);
    registry.register(WeakFormKind::Diffusion, AssemblyVariant::Reference, swap_block);

    let mut form = BilinearForm::new(&engine, &space)
        .unwrap()
        .with_registry(registry);
    form.add_integrator(IntegratorDescription::mass(1.0))
        .unwrap();
    form.add_integrator(IntegratorDescription::diffusion(1.0))
        .unwrap();
    form.assemble().unwrap();
    form.compute_element_matrices().unwrap();

    let expected = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
    for e in 0..2 {
        assert_eq!(form.element_matrix(e).unwrap(), expected);
    }
    assert_eq!(form.element_matrices().unwrap().to_vec(), vec![1.0; 8]);
    assert!(form.element_matrix(2).is_none());
}

#[test]
fn linear_element_matrices() {
    let engine = reference_engine();
    let h = 0.25;
    let space = IntervalSpace::uniform(&engine, 4, 1.0);

    let element_matrix = |description: IntegratorDescription<f64>| {
        let mut form = BilinearForm::new(&engine, &space).unwrap();
        form.add_integrator(description).unwrap();
        form.assemble().unwrap();
        form.compute_element_matrices().unwrap();
        form.element_matrix(1).unwrap()
    };

    let mass = element_matrix(IntegratorDescription::mass(3.0));
    let expected_mass = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]) * (3.0 * h / 6.0);
    assert_matrix_eq!(mass, expected_mass, comp = abs, tol = 1e-14);

    let diffusion = element_matrix(IntegratorDescription::diffusion(2.0));
    let expected_diffusion = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]) * (2.0 / h);
    assert_matrix_eq!(diffusion, expected_diffusion, comp = abs, tol = 1e-12);

    // Rows are test functions, columns are trial functions
    let advection = element_matrix(IntegratorDescription::advection(4.0));
    let expected_advection = DMatrix::from_row_slice(2, 2, &[-0.5, 0.5, -0.5, 0.5]) * 4.0;
    assert_matrix_eq!(advection, expected_advection, comp = abs, tol = 1e-12);
}

#[test]
fn accumulation_is_linear_in_integrators() {
    let engine = reference_engine();
    let space = IntervalSpace::from_vertices(&engine, vec![0.0, 0.1, 0.5, 0.6, 1.5]);

    let mut single = BilinearForm::new(&engine, &space).unwrap();
    single
        .add_integrator(IntegratorDescription::mass(3.0))
        .unwrap();
    single.assemble().unwrap();
    single.compute_element_matrices().unwrap();

    let mut split = BilinearForm::new(&engine, &space).unwrap();
    split
        .add_integrator(IntegratorDescription::mass(1.0))
        .unwrap();
    split
        .add_integrator(IntegratorDescription::mass(2.0))
        .unwrap();
    split.assemble().unwrap();
    split.compute_element_matrices().unwrap();

    for e in 0..space.num_elements() {
        assert_matrix_eq!(
            split.element_matrix(e).unwrap(),
            single.element_matrix(e).unwrap(),
            comp = abs,
            tol = 1e-14
        );
    }
}

#[test]
fn element_matrix_buffer_is_reused() {
    let engine = reference_engine();
    let space = IntervalSpace::uniform(&engine, 3, 1.0);
    let mut form = BilinearForm::new(&engine, &space).unwrap();
    form.add_integrator(IntegratorDescription::diffusion(1.0))
        .unwrap();
    form.assemble().unwrap();

    assert!(form.element_matrices().is_none());
    form.compute_element_matrices().unwrap();
    let first = form.element_matrices().unwrap();
    let values = first.to_vec();
    assert_eq!(first.len(), 3 * 4);

    form.compute_element_matrices().unwrap();
    let second = form.element_matrices().unwrap();
    assert!(second.aliases(&first));
    assert_eq!(second.to_vec(), values);
}

/// Adds a constant to every entry, then fails from the given call onwards.
#[derive(Debug)]
struct FailsAfter {
    calls: AtomicUsize,
    successful_calls: usize,
}

impl Integrator<f64> for FailsAfter {
    fn kind(&self) -> WeakFormKind {
        WeakFormKind::Diffusion
    }

    fn supports_element_matrices(&self) -> bool {
        true
    }

    fn add_element_matrices(&self, output: &mut [f64]) -> Result<(), AssemblyError> {
        output.iter_mut().for_each(|v| *v += 5.0);
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.successful_calls {
            return Err(AssemblyError::Kernel(eyre::eyre!("element kernel failed")));
        }
        Ok(())
    }

    fn add_mult(&self, _x: &[f64], _y: &mut [f64]) -> Result<(), AssemblyError> {
        Ok(())
    }
}

fn fails_on_second_call<'a>(
    _description: &IntegratorDescription<f64>,
    _context: &IntegratorContext<'a, f64>,
) -> Result<Box<dyn Integrator<f64> + 'a>, AssemblyError> {
    Ok(Box::new(FailsAfter {
        calls: AtomicUsize::new(0),
        successful_calls: 1,
    }))
}

#[test]
fn failed_computation_discards_element_matrices() {
    let engine = reference_engine();
    let space = IntervalSpace::uniform(&engine, 2, 1.0);
    let mut registry = IntegratorRegistry::empty();
    registry.register(WeakFormKind::Mass, AssemblyVariant::Reference, identity_block);
    registry.register(WeakFormKind::Diffusion, AssemblyVariant::Reference, fails_on_second_call);

    let mut form = BilinearForm::new(&engine, &space)
        .unwrap()
        .with_registry(registry);
    form.add_integrator(IntegratorDescription::mass(1.0))
        .unwrap();
    form.add_integrator(IntegratorDescription::diffusion(1.0))
        .unwrap();
    form.assemble().unwrap();

    form.compute_element_matrices().unwrap();
    assert_eq!(form.element_matrix(0).unwrap()[(0, 0)], 6.0);

    assert!(matches!(form.compute_element_matrices(), Err(AssemblyError::Kernel(_))));
    assert!(form.element_matrices().is_none());
    assert!(form.element_matrix(0).is_none());

    let mut coo = CooMatrix::new(3, 3);
    assert!(matches!(form.assemble_sparse_into(&mut coo), Err(AssemblyError::Kernel(_))));
    assert_eq!(coo.nnz(), 0);
}

#[test]
fn sparse_builder_dimensions_are_checked() {
    let engine = reference_engine();
    let space = IntervalSpace::uniform(&engine, 3, 1.0);
    let mut form = BilinearForm::new(&engine, &space).unwrap();
    form.add_integrator(IntegratorDescription::mass(1.0))
        .unwrap();
    form.assemble().unwrap();

    let mut too_few_rows = CooMatrix::new(3, 4);
    assert!(matches!(
        form.assemble_sparse_into(&mut too_few_rows),
        Err(AssemblyError::LayoutMismatch { expected, actual })
            if expected.size() == 4 && actual.size() == 3
    ));
    let mut too_many_cols = CooMatrix::new(4, 5);
    assert!(matches!(
        form.assemble_sparse_into(&mut too_many_cols),
        Err(AssemblyError::LayoutMismatch { expected, actual })
            if expected.size() == 4 && actual.size() == 5
    ));
    assert_eq!(too_few_rows.nnz(), 0);
    assert_eq!(too_many_cols.nnz(), 0);
    assert!(form.element_matrices().is_none());

    let mut coo = CooMatrix::new(4, 4);
    form.assemble_sparse_into(&mut coo).unwrap();
    assert!(coo.nnz() > 0);
}

#[test]
fn element_matrices_require_capable_integrators() {
    let engine = Engine::default();
    let space = IntervalSpace::uniform(&engine, 3, 1.0);
    let mut form = BilinearForm::new(&engine, &space).unwrap();
    form.add_integrator(IntegratorDescription::mass(1.0))
        .unwrap();

    assert!(matches!(form.compute_element_matrices(), Err(AssemblyError::NotAssembled)));

    form.assemble().unwrap();
    assert!(!form.integrators()[0].supports_element_matrices());
    assert!(matches!(
        form.compute_element_matrices(),
        Err(AssemblyError::MissingElementMatrices {
            kind: WeakFormKind::Mass
        })
    ));
    assert!(form.element_matrices().is_none());
}

#[test]
fn mixed_element_matrices_have_test_rows() {
    let engine = reference_engine();
    let trial = IntervalSpace::uniform(&engine, 2, 1.0);
    let test = IntervalSpace::uniform(&engine, 2, 2.0);
    let mut form = BilinearForm::mixed(&engine, &trial, &test).unwrap();
    assert!(form.is_mixed());
    form.add_integrator(IntegratorDescription::advection(1.0))
        .unwrap();
    form.assemble().unwrap();
    form.compute_element_matrices().unwrap();

    // Trial gradients are -2 and 2, and every test function integrates to 0.5
    let expected = DMatrix::from_row_slice(2, 2, &[-1.0, 1.0, -1.0, 1.0]);
    assert_matrix_eq!(form.element_matrix(0).unwrap(), expected, comp = abs, tol = 1e-12);
}

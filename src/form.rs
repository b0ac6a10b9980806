//! The assembly coordinator.
use crate::buffer::{Buffer, Layout};
use crate::constrained::ConstrainedOperator;
use crate::constraints::{zero_complement, ConstraintList};
use crate::engine::Engine;
use crate::error::AssemblyError;
use crate::exec::Executor;
use crate::integrators::{
    same_space, AssemblyVariant, Integrator, IntegratorContext, IntegratorDescription, IntegratorRegistry,
};
use crate::operator::{check_apply_args, check_layout, LinearOperator, RapOperator};
use crate::space::{ConformingProlongation, ElementRestriction, FiniteElementSpace};
use crate::sparse::{eliminate_rows_cols, DistributedAssembler, SparseMatrixBuilder};
use crate::system::{EliminatedMatrix, LinearSystem, SystemKind, SystemMatrix, SystemVector};
use crate::Real;
use log::debug;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::cell::RefCell;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum AssemblyState {
    Unassembled,
    Assembled,
}

/// A bilinear form `a(v, u)` over a trial space (`u`) and a test space (`v`).
///
/// Integrators are added as device-agnostic [`IntegratorDescription`]s and resolved into
/// device-specialized [`Integrator`]s by [`assemble`](Self::assemble). After assembly the form
/// acts as a [`LinearOperator`] from local trial dofs to local test dofs, and produces
/// constrained linear systems through [`form_linear_system`](Self::form_linear_system).
#[derive(Debug)]
pub struct BilinearForm<'a, T: Real> {
    trial: &'a dyn FiniteElementSpace<T>,
    test: &'a dyn FiniteElementSpace<T>,
    variant: AssemblyVariant,
    executor: Executor,
    registry: IntegratorRegistry<T>,
    descriptions: Vec<IntegratorDescription<T>>,
    integrators: Vec<Box<dyn Integrator<T> + 'a>>,
    state: AssemblyState,
    trial_restriction: ElementRestriction,
    test_restriction: ElementRestriction,
    element_matrices: RefCell<Option<Buffer<T>>>,
    // E-vectors of the trial and test spaces
    trial_evector: RefCell<Buffer<T>>,
    test_evector: RefCell<Buffer<T>>,
    distributed: Option<Box<dyn DistributedAssembler<T> + 'a>>,
}

impl<'a, T: Real> BilinearForm<'a, T> {
    /// A form whose trial and test spaces are both `space`.
    pub fn new(engine: &Engine, space: &'a dyn FiniteElementSpace<T>) -> Result<Self, AssemblyError> {
        Self::with_spaces(engine, space, space)
    }

    /// A form with distinct trial and test spaces.
    ///
    /// The spaces must share the element partition: equal element counts, quadrature sizes and
    /// geometric dimensions. Mixed forms cannot be used matrix-free.
    pub fn mixed(
        engine: &Engine,
        trial: &'a dyn FiniteElementSpace<T>,
        test: &'a dyn FiniteElementSpace<T>,
    ) -> Result<Self, AssemblyError> {
        let mismatch = [
            ("element counts", trial.num_elements(), test.num_elements()),
            (
                "quadrature sizes",
                trial.element_quadrature_size(),
                test.element_quadrature_size(),
            ),
            ("geometric dimensions", trial.geometry_dim(), test.geometry_dim()),
        ]
        .into_iter()
        .find(|(_, a, b)| a != b);
        if let Some((what, a, b)) = mismatch {
            return Err(AssemblyError::IncompatibleSpaces {
                reason: format!("{} differ (trial: {}, test: {})", what, a, b),
            });
        }
        Self::with_spaces(engine, trial, test)
    }

    fn with_spaces(
        engine: &Engine,
        trial: &'a dyn FiniteElementSpace<T>,
        test: &'a dyn FiniteElementSpace<T>,
    ) -> Result<Self, AssemblyError> {
        let executor = engine.executor();
        let trial_restriction = ElementRestriction::from_space(trial, executor)?;
        let test_restriction = ElementRestriction::from_space(test, executor)?;
        let trial_evector = Buffer::zeros(
            trial
                .local_layout()
                .with_size(trial_restriction.element_vector_len()),
        );
        let test_evector = Buffer::zeros(
            test.local_layout()
                .with_size(test_restriction.element_vector_len()),
        );
        Ok(Self {
            trial,
            test,
            variant: engine.variant(),
            executor,
            registry: IntegratorRegistry::with_builtin(),
            descriptions: Vec::new(),
            integrators: Vec::new(),
            state: AssemblyState::Unassembled,
            trial_restriction,
            test_restriction,
            element_matrices: RefCell::new(None),
            trial_evector: RefCell::new(trial_evector),
            test_evector: RefCell::new(test_evector),
            distributed: None,
        })
    }

    /// Replaces the registry used to resolve integrators in [`assemble`](Self::assemble).
    pub fn with_registry(self, registry: IntegratorRegistry<T>) -> Self {
        Self { registry, ..self }
    }

    /// Attaches the collaborator that finalizes [`SystemKind::Distributed`] systems.
    pub fn with_distributed_assembler(self, assembler: Box<dyn DistributedAssembler<T> + 'a>) -> Self {
        Self {
            distributed: Some(assembler),
            ..self
        }
    }

    pub fn trial(&self) -> &'a dyn FiniteElementSpace<T> {
        self.trial
    }

    pub fn test(&self) -> &'a dyn FiniteElementSpace<T> {
        self.test
    }

    pub fn is_mixed(&self) -> bool {
        !same_space(self.trial, self.test)
    }

    pub fn variant(&self) -> AssemblyVariant {
        self.variant
    }

    pub fn is_assembled(&self) -> bool {
        self.state == AssemblyState::Assembled
    }

    pub fn descriptions(&self) -> &[IntegratorDescription<T>] {
        &self.descriptions
    }

    pub fn integrators(&self) -> &[Box<dyn Integrator<T> + 'a>] {
        &self.integrators
    }

    /// Layout of the unknowns of linear systems formed from this form.
    pub fn true_layout(&self) -> Layout {
        self.trial.true_layout()
    }

    pub fn add_integrator(&mut self, description: IntegratorDescription<T>) -> Result<(), AssemblyError> {
        if self.is_assembled() {
            return Err(AssemblyError::AlreadyAssembled);
        }
        self.descriptions.push(description);
        Ok(())
    }

    /// Resolves every integrator description for the configured variant.
    ///
    /// Assembling an assembled form does nothing. If any description cannot be resolved, the
    /// form stays unassembled and none of the integrators are kept.
    pub fn assemble(&mut self) -> Result<(), AssemblyError> {
        if self.is_assembled() {
            debug!("Form is already assembled, skipping");
            return Ok(());
        }
        let context = IntegratorContext::new(self.trial, self.test, self.executor);
        let integrators = self
            .descriptions
            .iter()
            .map(|description| self.registry.resolve(description, self.variant, &context))
            .collect::<Result<Vec<_>, _>>()?;
        self.integrators = integrators;
        self.state = AssemblyState::Assembled;
        debug!(
            "Assembled form with {} integrators ({:?} variant, {} elements)",
            self.integrators.len(),
            self.variant,
            self.test.num_elements()
        );
        Ok(())
    }

    fn check_assembled(&self) -> Result<(), AssemblyError> {
        if self.is_assembled() {
            Ok(())
        } else {
            Err(AssemblyError::NotAssembled)
        }
    }

    fn element_block_size(&self) -> usize {
        self.test.element_dof_count() * self.trial.element_dof_count()
    }

    /// Computes the sum of the element matrices of all integrators.
    ///
    /// The result holds one `test_dofs x trial_dofs` block per element, element-major, each
    /// block stored row-major. It is allocated on first use and reused afterwards.
    pub fn compute_element_matrices(&self) -> Result<(), AssemblyError> {
        self.check_assembled()?;
        if let Some(integrator) = self
            .integrators
            .iter()
            .find(|integrator| !integrator.supports_element_matrices())
        {
            return Err(AssemblyError::MissingElementMatrices {
                kind: integrator.kind(),
            });
        }

        let layout = self
            .test
            .local_layout()
            .with_size(self.test.num_elements() * self.element_block_size());
        let mut element_matrices = self.element_matrices.borrow_mut();
        if let Some(buffer) = element_matrices.as_mut() {
            buffer.pull();
        }
        let result = {
            let buffer = element_matrices.get_or_insert_with(|| Buffer::zeros(layout));
            let mut guard = buffer.write();
            let data: &mut [T] = &mut guard;
            self.executor
                .for_each_mut(layout.device(), data, |_, v| *v = T::zero());
            let result = self
                .integrators
                .iter()
                .try_for_each(|integrator| integrator.add_element_matrices(data));
            result
        };
        if result.is_err() {
            // Partially accumulated blocks must not be handed out
            *element_matrices = None;
        }
        result
    }

    /// The element matrices computed by the last call to
    /// [`compute_element_matrices`](Self::compute_element_matrices), sharing its storage.
    pub fn element_matrices(&self) -> Option<Buffer<T>> {
        self.element_matrices.borrow().as_ref().map(Buffer::alias)
    }

    /// The computed matrix of a single element, with test dofs as rows.
    pub fn element_matrix(&self, element_index: usize) -> Option<DMatrix<T>> {
        let element_matrices = self.element_matrices.borrow();
        let buffer = element_matrices.as_ref()?;
        let size = self.element_block_size();
        let data = buffer.read();
        let block = data.get(element_index * size..(element_index + 1) * size)?;
        Some(DMatrix::from_row_slice(
            self.test.element_dof_count(),
            self.trial.element_dof_count(),
            block,
        ))
    }

    /// Scatters the element matrices into `builder`, at true dofs if the spaces have conforming
    /// prolongations.
    ///
    /// Fails with [`AssemblyError::LayoutMismatch`] if the dimensions of `builder` do not match
    /// the true dofs of the spaces.
    pub fn assemble_sparse_into(&self, builder: &mut dyn SparseMatrixBuilder<T>) -> Result<(), AssemblyError> {
        let (rows, cols) = (self.test.true_layout(), self.trial.true_layout());
        if builder.nrows() != rows.size() {
            return Err(AssemblyError::LayoutMismatch {
                expected: rows,
                actual: rows.with_size(builder.nrows()),
            });
        }
        if builder.ncols() != cols.size() {
            return Err(AssemblyError::LayoutMismatch {
                expected: cols,
                actual: cols.with_size(builder.ncols()),
            });
        }
        self.compute_element_matrices()?;

        let element_matrices = self.element_matrices.borrow();
        let Some(buffer) = element_matrices.as_ref() else {
            return Ok(());
        };
        let data = buffer.read();
        let size = self.element_block_size();
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for e in 0..self.test.num_elements() {
            map_to_true(self.test_restriction.element_dofs(e), self.test.prolongation(), &mut rows);
            map_to_true(self.trial_restriction.element_dofs(e), self.trial.prolongation(), &mut cols);
            builder.add_element_block(&rows, &cols, &data[e * size..(e + 1) * size]);
        }
        Ok(())
    }

    /// Assembles the form into a COO matrix over true dofs, with explicit diagonal entries at
    /// constrained dofs.
    fn assemble_coo(&self, constraints: &ConstraintList) -> Result<CooMatrix<T>, AssemblyError> {
        let mut coo = CooMatrix::new(self.test.true_layout().size(), self.trial.true_layout().size());
        self.assemble_sparse_into(&mut coo)?;
        for &c in constraints.indices() {
            coo.push(c, c, T::zero());
        }
        Ok(coo)
    }

    fn check_system_kind(&self, kind: SystemKind) -> Result<(), AssemblyError> {
        match kind {
            SystemKind::MatrixFree if self.is_mixed() => Err(AssemblyError::MixedSpaces),
            SystemKind::Distributed if self.distributed.is_none() => {
                Err(AssemblyError::UnsupportedRepresentation { kind })
            }
            _ => Ok(()),
        }
    }

    /// Forms the system operator over true dofs with the given dofs constrained.
    ///
    /// For [`SystemKind::MatrixFree`], the operator is `P^T A P` if the space has a conforming
    /// prolongation `P` and the form itself otherwise, wrapped by a [`ConstrainedOperator`].
    /// The explicit kinds assemble element matrices into a sparse matrix and eliminate the
    /// constrained rows and columns.
    pub fn form_system_matrix<'s>(
        &'s self,
        constraints: &'s ConstraintList,
        kind: SystemKind,
    ) -> Result<SystemMatrix<'s, T>, AssemblyError> {
        self.check_assembled()?;
        self.check_system_kind(kind)?;
        constraints.check_system_size(self.test.true_layout().size())?;
        debug!(
            "Forming {:?} system matrix with {} constrained dofs",
            kind,
            constraints.len()
        );

        match kind {
            SystemKind::MatrixFree => {
                let operator = match self.trial.prolongation() {
                    Some(p) => {
                        let mut rap = RapOperator::new(p, self, p)?;
                        if self.has_coupled_copies() {
                            rap = rap.without_diagonal();
                        }
                        let rap: Box<dyn LinearOperator<T> + 's> = Box::new(rap);
                        ConstrainedOperator::new(rap, constraints, self.executor)?
                    }
                    None => {
                        let base: &'s dyn LinearOperator<T> = self;
                        ConstrainedOperator::new(base, constraints, self.executor)?
                    }
                };
                Ok(SystemMatrix::MatrixFree(operator))
            }
            SystemKind::Csr => {
                let coo = self.assemble_coo(constraints)?;
                let mut matrix = CsrMatrix::from(&coo);
                let eliminated = eliminate_rows_cols(&mut matrix, constraints)?;
                let matrix = EliminatedMatrix::new(matrix, eliminated, constraints, self.true_layout(), self.executor)?;
                Ok(SystemMatrix::Sparse(matrix))
            }
            SystemKind::Distributed => {
                let assembler = self
                    .distributed
                    .as_ref()
                    .ok_or(AssemblyError::UnsupportedRepresentation { kind })?;
                let coo = self.assemble_coo(constraints)?;
                let mut matrix = assembler.finalize(&coo)?;
                let eliminated = assembler.eliminate(&mut matrix, constraints)?;
                let matrix = EliminatedMatrix::new(matrix, eliminated, constraints, self.true_layout(), self.executor)?;
                Ok(SystemMatrix::Sparse(matrix))
            }
        }
    }

    /// Forms the linear system `A X = B` over true dofs for the solution guess `x` and the
    /// right-hand side `b`, both on local dofs.
    ///
    /// With a conforming prolongation, `X = R x` and `B = P^T b` are new buffers. Otherwise
    /// `X` and `B` share storage with `x` and `b`, which are then modified in place. In both
    /// cases `B` is made consistent with the values of `X` at constrained dofs. If
    /// `copy_interior` is false, the free entries of `X` are zeroed.
    ///
    /// All arguments are validated before any buffer is modified.
    pub fn form_linear_system<'s>(
        &'s self,
        constraints: &'s ConstraintList,
        x: &mut Buffer<T>,
        b: &mut Buffer<T>,
        kind: SystemKind,
        copy_interior: bool,
    ) -> Result<LinearSystem<'s, T>, AssemblyError> {
        self.check_assembled()?;
        check_apply_args(self.trial.local_layout(), self.test.local_layout(), b, x)?;
        constraints.check_system_size(self.test.true_layout().size())?;
        self.check_system_kind(kind)?;
        if self.trial.prolongation().is_some() != self.test.prolongation().is_some() {
            return Err(AssemblyError::IncompatibleSpaces {
                reason: "only one of the spaces has a conforming prolongation".to_string(),
            });
        }

        let matrix = self.form_system_matrix(constraints, kind)?;
        let (mut x_true, mut b_true) = match (self.trial.prolongation(), self.test.prolongation()) {
            (Some(trial_p), Some(test_p)) => {
                let mut x_true = Buffer::zeros(trial_p.true_layout());
                trial_p.restrict(&x.read(), &mut x_true.write());
                let mut b_true = Buffer::zeros(test_p.true_layout());
                test_p.accumulate(&b.read(), &mut b_true.write());
                (SystemVector::Transformed(x_true), SystemVector::Transformed(b_true))
            }
            _ => (SystemVector::Aliased(x.alias()), SystemVector::Aliased(b.alias())),
        };

        if let SystemMatrix::Sparse(eliminated) = &matrix {
            eliminated.eliminate_bc(x_true.buffer(), b_true.buffer_mut())?;
        }
        if !copy_interior && !constraints.is_empty() {
            zero_complement(&self.executor, constraints, x_true.buffer_mut())?;
        }
        if let SystemMatrix::MatrixFree(operator) = &matrix {
            operator.eliminate_rhs(x_true.buffer(), b_true.buffer_mut())?;
        }
        debug!(
            "Formed linear system with {} unknowns ({})",
            x_true.buffer().len(),
            if x_true.is_aliased() { "aliased" } else { "transformed" }
        );

        Ok(LinearSystem {
            matrix,
            x: x_true,
            b: b_true,
        })
    }

    /// Recovers the local solution `x` from the solution `X` of a system formed by
    /// [`form_linear_system`](Self::form_linear_system).
    ///
    /// With a conforming prolongation, `x := P X`. Otherwise `x` is made to share storage
    /// with `X`.
    pub fn recover_fem_solution(&self, x_true: &Buffer<T>, b: &Buffer<T>, x: &mut Buffer<T>) -> Result<(), AssemblyError> {
        check_layout(x_true, self.true_layout())?;
        check_layout(b, self.test.local_layout())?;
        match self.trial.prolongation() {
            Some(p) => {
                check_apply_args(p.true_layout(), p.local_layout(), x, x_true)?;
                p.prolong(&x_true.read(), &mut x.write());
            }
            None => {
                if !x.aliases(x_true) {
                    x.make_ref(x_true);
                }
            }
        }
        Ok(())
    }

    /// The diagonal of the system matrix over true dofs, without constraints.
    ///
    /// Local diagonals are summed onto true dofs through `P^T`. Fails with
    /// [`AssemblyError::DiagonalUnsupported`] if an element holds two local copies of the same
    /// true dof, since their coupling would be missing from the sum.
    pub fn assemble_true_diagonal(&self, diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        match self.trial.prolongation() {
            Some(p) => {
                check_layout(diagonal, p.true_layout())?;
                if self.has_coupled_copies() {
                    return Err(AssemblyError::DiagonalUnsupported {
                        operator: "BilinearForm",
                    });
                }
                let mut local = Buffer::zeros(self.trial.local_layout());
                self.assemble_diagonal(&mut local)?;
                p.accumulate(&local.read(), &mut diagonal.write());
                Ok(())
            }
            None => self.assemble_diagonal(diagonal),
        }
    }

    /// Whether some element holds two local dofs that are copies of the same true dof.
    fn has_coupled_copies(&self) -> bool {
        let Some(p) = self.trial.prolongation() else {
            return false;
        };
        let local_to_true = p.local_to_true();
        (0..self.trial_restriction.num_elements()).any(|e| {
            let dofs = self.trial_restriction.element_dofs(e);
            dofs.iter().enumerate().any(|(i, &a)| {
                dofs[i + 1..]
                    .iter()
                    .any(|&b| local_to_true[a] == local_to_true[b])
            })
        })
    }

    fn apply_with(
        &self,
        y: &mut Buffer<T>,
        x: &Buffer<T>,
        transpose: bool,
    ) -> Result<(), AssemblyError> {
        self.check_assembled()?;
        let (input_restriction, output_restriction, mut input_evector, mut output_evector) = if transpose {
            (
                &self.test_restriction,
                &self.trial_restriction,
                self.test_evector.borrow_mut(),
                self.trial_evector.borrow_mut(),
            )
        } else {
            (
                &self.trial_restriction,
                &self.test_restriction,
                self.trial_evector.borrow_mut(),
                self.test_evector.borrow_mut(),
            )
        };
        check_apply_args(input_restriction.local_layout(), output_restriction.local_layout(), y, x)?;

        input_restriction.gather(&x.read(), &mut input_evector.write());
        output_evector.fill(T::zero());
        {
            let x_e = input_evector.read();
            let mut y_e = output_evector.write();
            for integrator in &self.integrators {
                if transpose {
                    integrator.add_mult_transpose(&x_e, &mut y_e)?;
                } else {
                    integrator.add_mult(&x_e, &mut y_e)?;
                }
            }
        }
        output_restriction.reduce(&output_evector.read(), &mut y.write());
        Ok(())
    }
}

fn map_to_true(local_dofs: &[usize], prolongation: Option<&ConformingProlongation>, output: &mut Vec<usize>) {
    output.clear();
    match prolongation {
        Some(p) => output.extend(local_dofs.iter().map(|&l| p.local_to_true()[l])),
        None => output.extend_from_slice(local_dofs),
    }
}

impl<'a, T: Real> LinearOperator<T> for BilinearForm<'a, T> {
    fn in_layout(&self) -> Layout {
        self.trial.local_layout()
    }

    fn out_layout(&self) -> Layout {
        self.test.local_layout()
    }

    /// Applies the form element by element: gathers `x` into the trial E-vector, applies every
    /// integrator and sums the test E-vector onto local dofs.
    fn apply(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        self.apply_with(y, x, false)
    }

    fn apply_transpose(&self, y: &mut Buffer<T>, x: &Buffer<T>) -> Result<(), AssemblyError> {
        self.apply_with(y, x, true)
    }

    /// The diagonal over local dofs.
    fn assemble_diagonal(&self, diagonal: &mut Buffer<T>) -> Result<(), AssemblyError> {
        self.check_assembled()?;
        if self.is_mixed() {
            return Err(AssemblyError::MixedSpaces);
        }
        check_layout(diagonal, self.test.local_layout())?;
        let mut d_e = self.test_evector.borrow_mut();
        d_e.fill(T::zero());
        {
            let mut d_e = d_e.write();
            for integrator in &self.integrators {
                integrator.add_diagonal(&mut d_e)?;
            }
        }
        self.test_restriction
            .reduce(&d_e.read(), &mut diagonal.write());
        Ok(())
    }
}

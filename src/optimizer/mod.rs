pub mod builder;
pub mod extract;
pub mod formulation;
pub mod program;
pub mod solver;

pub use builder::{AssetIndex, BuiltProgram, ProblemBuilder, VariableIndex};
pub use extract::{Extraction, ResultExtractor, ValidationCheck, ValidationMismatch};
pub use formulation::AssetVars;
pub use program::{LinearConstraint, ProgramSpec, Sense, VarId, Variable};
pub use solver::{
    AbortHandle, BackendOutput, CbcBackend, HighsBackend, MinilpBackend, RawResult, SolverAdapter, SolverBackend,
    SolverConfig, SolverFailure, SolverKind, StopReason, Substitution, SubstitutionReason,
};

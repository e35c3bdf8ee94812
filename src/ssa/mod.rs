mod context;
mod control;
mod gen;
mod phis;

pub use self::context::BuilderContext;

#[derive(Copy, Clone, Debug, Default)]
pub struct CompileOptions {
    /// Abort on the first reported error instead of continuing with a
    /// placeholder value.
    pub exit_on_first_error: bool,
}

use crate::error::ShaderResult;

/// Per-cycle behavior shared by every clocked unit.
pub trait ModuleBehaviors {
    /// Advance the module by one cycle of its own clock.
    fn tick_one(&mut self) -> ShaderResult<()>;

    /// Put the module back into its post-construction state.
    fn reset(&mut self);
}

//! Helpers shared by the passes.

/// Trait that describes named things. Every pass implements it so that it
/// can be identified in logs and error messages.
pub trait Named {
    /// The name of a pass.
    fn name() -> &'static str;
    /// A short description of the pass.
    fn description() -> &'static str;
}

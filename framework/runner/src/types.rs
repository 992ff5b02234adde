/// Recommended error type for your scenario `main` function and for collaborator implementations.
/// Use `?` to propagate errors and `.context(...)` to say what was being attempted.
pub type TestbedResult<T> = anyhow::Result<T>;

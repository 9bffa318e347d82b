/// Recommended error type for a scenario `main` function and any glue code around the runner.
pub type NetGaugeResult<T> = anyhow::Result<T>;

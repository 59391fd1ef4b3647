mod worker;

pub(crate) use worker::{GradingPipeline, JobOutcome, PipelineError};

pub(crate) mod grading;
pub(crate) mod queue;
pub(crate) mod scheduler;

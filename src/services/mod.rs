pub(crate) mod grading;
pub(crate) mod llm;
pub(crate) mod ocr;
pub(crate) mod quota;
pub(crate) mod regrade;
pub(crate) mod storage;
pub(crate) mod submission_store;

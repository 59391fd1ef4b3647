mod commands;
mod queries;
mod types;

pub(crate) use commands::{
    mark_done, mark_failed, mark_processing, reset_for_regrade, save_ocr_text,
};
pub(crate) use queries::find_by_id;
pub(crate) use types::DoneUpdate;

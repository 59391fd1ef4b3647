pub(crate) mod health;
pub(crate) mod images;
pub(crate) mod submissions;
pub(crate) mod system_config;

pub(crate) mod interviews;
pub(crate) mod jobs;
pub(crate) mod ws;

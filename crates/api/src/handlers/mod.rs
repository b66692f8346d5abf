pub mod attempts;
pub mod jobs;

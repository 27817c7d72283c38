pub mod record;
pub mod tag;

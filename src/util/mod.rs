pub mod clock;
pub(crate) mod lock;

pub(crate) mod helpers;
pub(crate) mod list;
pub(crate) mod verify;
pub(crate) mod visualize;

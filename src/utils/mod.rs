//! Small building blocks shared by the dispatcher's containers.

pub(crate) mod active;
pub(crate) mod errno;

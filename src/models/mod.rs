pub(crate) mod callback;
pub(crate) mod earnings;
pub(crate) mod transaction;

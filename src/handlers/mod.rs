pub(crate) mod withdrawal_handlers;

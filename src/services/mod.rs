pub(crate) mod mpesa_gateway;
pub(crate) mod token_cache;
pub(crate) mod withdrawal_service;

pub(crate) mod claims;

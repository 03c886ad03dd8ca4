pub mod decoders;
pub mod pow_utils;
pub mod signature_utils;
pub mod url_validator;

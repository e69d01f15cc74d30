pub(crate) mod attributes;
pub(crate) mod json_encoder;

pub(crate) mod uploader;

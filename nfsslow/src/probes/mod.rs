pub(crate) mod kprobes;
pub(crate) mod template;

mod diagnostics;
mod lifecycle;
mod registration;
mod selector;
mod sync;

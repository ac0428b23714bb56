pub mod action;
pub mod rule;
pub mod selector;
pub mod steering;
pub mod template;

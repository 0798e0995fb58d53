pub mod explainable;
pub mod plan_display;

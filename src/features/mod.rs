pub mod fluid;

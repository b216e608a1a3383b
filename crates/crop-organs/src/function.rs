//! Injected daily functions.
//!
//! Organs are built with their parameter functions already resolved, so the
//! daily loop only calls [`DailyFunction::value`].

use crate::context::DayContext;
use serde::{Deserialize, Serialize};

/// A scalar evaluated once per day.
pub trait DailyFunction {
    fn value(&self, ctx: &DayContext) -> f64;
}

/// A function that ignores the day.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constant(pub f64);

impl DailyFunction for Constant {
    fn value(&self, _ctx: &DayContext) -> f64 {
        self.0
    }
}

impl<F> DailyFunction for F
where
    F: Fn(&DayContext) -> f64,
{
    fn value(&self, ctx: &DayContext) -> f64 {
        self(ctx)
    }
}

pub type BoxedFunction = Box<dyn DailyFunction>;

pub fn constant(value: f64) -> BoxedFunction {
    Box::new(Constant(value))
}

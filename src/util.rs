use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) const LOG_ZERO: f64 = f64::NEG_INFINITY;

// log(exp(a) + exp(b)) without leaving the log domain
pub(crate) fn log_add(a: f64, b: f64) -> f64 {
    if a == LOG_ZERO {
        return b;
    }
    if b == LOG_ZERO {
        return a;
    }
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}

// log of the sum of exp(x) over the values
pub(crate) fn log_sum(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(LOG_ZERO, f64::max);
    if max == LOG_ZERO || !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/*
    A f64 stored as raw bits so that many worker threads can accumulate into the
    same slot without a lock. Only the operations the pipeline needs are exposed.
*/
#[derive(Debug)]
pub(crate) struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> AtomicF64 {
        AtomicF64 { bits: AtomicU64::new(value.to_bits()) }
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    // adds in the log domain, retrying if another thread got there first
    pub(crate) fn log_add(&self, value: f64) {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let next = log_add(f64::from_bits(current), value).to_bits();
            match self.bits.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

//! Lock-time buffer for the first leg of a swap.
//!
//! Block production on each chain is modelled as a Poisson process. The maker
//! picks a first-leg lock long enough that, with probability `quantile`, it
//! outlives the second-leg lock even when the two chains drift apart.

/// Smallest `k` with `P(X <= k) >= p` for `X ~ Poisson(lambda)`.
///
/// Terms are accumulated in log space so large `lambda` values do not
/// underflow `exp(-lambda)`.
pub fn poisson_quantile(p: f64, lambda: f64) -> u64 {
    if !(lambda > 0.0) || !(p > 0.0) {
        return 0;
    }
    let target = p.min(1.0).ln();
    // The quantile never lies this far above the mean for any p < 1 - 1e-12.
    let max_k = (lambda + 20.0 * lambda.sqrt() + 50.0).ceil() as u64;
    let ln_lambda = lambda.ln();

    let mut log_pmf = -lambda;
    let mut log_cdf = log_pmf;
    let mut k = 0;
    while log_cdf < target && k < max_k {
        k += 1;
        log_pmf += ln_lambda - (k as f64).ln();
        log_cdf = log_add_exp(log_cdf, log_pmf);
    }
    k
}

fn log_add_exp(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Number of first-leg blocks needed to outlast a second-leg lock of
/// `second_leg_blocks`.
pub fn calculate_lock_buffer(
    second_leg_blocks: u64,
    second_leg_minutes_per_block: f64,
    first_leg_minutes_per_block: f64,
    quantile: f64,
) -> u64 {
    if !(first_leg_minutes_per_block > 0.0) {
        return 0;
    }
    let second_leg_minutes =
        poisson_quantile(quantile, second_leg_blocks as f64) as f64 * second_leg_minutes_per_block;
    poisson_quantile(quantile, second_leg_minutes / first_leg_minutes_per_block)
}

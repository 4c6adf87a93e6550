/// Iteration cap for [`root`], far above what the hybrid needs to reach machine precision.
const MAX_ITERATIONS: usize = 200;

/// Find function root
///
/// # Method
///
/// Newton-Bisection hybrid method based on [^1]. The Newton step is only taken while
/// it stays inside the bracket and shrinks fast enough, otherwise the bracket is bisected.
///
/// # Resources
///
/// [^1]: Numerical Recipes 2nd edition. p. 365
///
/// Returns `None` when $f(a) ⋅ f(b) > 0$, since the bracket holds no guaranteed root.
pub(crate) fn root<F>(func: F, a: f64, b: f64) -> Option<f64>
where
    F: Fn(f64) -> (f64, f64),
{
    let (mut xl, mut xh) = (a, b);
    let (fl, _) = func(xl);
    if fl == 0.0 {
        return Some(xl);
    }
    let (fh, _) = func(xh);
    if fh == 0.0 {
        return Some(xh);
    }
    if fl * fh > 0.0 || fl.is_nan() || fh.is_nan() {
        return None;
    }
    if fl > 0.0 {
        core::mem::swap(&mut xl, &mut xh);
    }
    let mut rts = 0.5 * (xl + xh);
    let mut dxold = (xl - xh).abs();
    let mut dx = dxold;
    let (mut f, mut df) = func(rts);
    for _ in 0..MAX_ITERATIONS {
        if (((rts - xh) * df - f) * ((rts - xl) * df - f) > 0.0)
            || (2.0 * f.abs() > (dxold * df).abs())
        {
            dxold = dx;
            dx = 0.5 * (xh - xl);
            rts = xl + dx;
            if xl == rts || xh == rts {
                return Some(rts);
            }
        } else {
            dxold = dx;
            dx = f / df;
            let previous = rts;
            rts -= dx;
            if previous == rts {
                return Some(rts);
            }
        }
        let (nf, ndf) = func(rts);
        f = nf;
        df = ndf;
        if f == 0.0 {
            return Some(rts);
        }
        if f < 0.0 {
            xl = rts;
        } else {
            xh = rts;
        }
    }
    Some(rts)
}

/// Inverts a monotonic-near-zero radial polynomial `r ↦ r·(1 + k1·r² + k2·r⁴)`.
///
/// The bracket starts at `[0, target]` and grows until it encloses `target`.
/// Falls back to `target` (no distortion) when no root can be bracketed.
pub(crate) fn invert_radial(target: f64, k1: f64, k2: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    let func = |r: f64| {
        let r2 = r * r;
        (
            r * (1.0 + k1 * r2 + k2 * r2 * r2) - target,
            1.0 + 3.0 * k1 * r2 + 5.0 * k2 * r2 * r2,
        )
    };
    let mut high = target;
    for _ in 0..32 {
        if func(high).0 >= 0.0 {
            return root(func, 0.0, high).unwrap_or(target);
        }
        high *= 2.0;
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cube_root() {
        let x = root(|x| (x * x * x - 8.0, 3.0 * x * x), 0.0, 5.0).unwrap();
        assert_relative_eq!(x, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_missing_bracket() {
        assert!(root(|x| (x * x + 1.0, 2.0 * x), -1.0, 1.0).is_none());
    }

    #[test]
    fn radial_inverse() {
        let (k1, k2) = (-0.12, 0.03);
        for &r in &[0.0, 0.05, 0.4, 0.9] {
            let r2: f64 = r * r;
            let distorted = r * (1.0 + k1 * r2 + k2 * r2 * r2);
            assert_relative_eq!(invert_radial(distorted, k1, k2), r, epsilon = 1e-12);
        }
    }
}

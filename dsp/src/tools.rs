// Naive, no special inf/nan handling.

pub fn max<T>(x: T, y: T) -> T
where
    T: PartialOrd,
{
    if x > y {
        x
    } else {
        y
    }
}

pub fn min<T>(x: T, y: T) -> T
where
    T: PartialOrd,
{
    if x < y {
        x
    } else {
        y
    }
}

/// Limit `x` to `[lo, hi]`.
///
/// With `lo > hi` the upper limit is applied first and the lower limit wins.
pub fn clamp<T>(x: T, lo: T, hi: T) -> T
where
    T: PartialOrd,
{
    max(lo, min(hi, x))
}

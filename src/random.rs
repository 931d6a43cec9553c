use rand::Rng;

/// Round `x` to a neighbouring integer, rounding up with probability equal
/// to the fractional part of `x`. Negative inputs round to 0.
///
/// The expected value of the result is `x`, so summing many rounded weights
/// does not drift towards either neighbour.
pub fn stochastic_round<R: Rng + ?Sized>(rng: &mut R, x: f64) -> usize {
    if x <= 0.0 {
        return 0;
    }
    let floor = x.floor();
    if rng.gen::<f64>() < x - floor {
        floor as usize + 1
    } else {
        floor as usize
    }
}

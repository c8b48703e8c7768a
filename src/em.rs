pub(crate) mod queue;
pub(crate) mod guard;
pub(crate) mod assigner;
pub(crate) mod driver;
pub(crate) mod rounds;

pub(crate) use driver::calc_abundances;
pub(crate) use rounds::RoundController;

/*
    Growth of a library's log fragment mass once its fragment count has reached n:
    ff * ln(n - 1) - ln(n^ff - 1). Positive for ff below 1, zero for ff = 1, so later
    fragments weigh more during online rounds and all weigh the same in batch rounds.
    Undefined below n = 2; those counts add nothing.
*/
pub(crate) fn mass_increment(n: usize, ff: f64) -> f64 {
    if n < 2 {
        return 0.0;
    }
    let n = n as f64;
    ff * (n - 1.0).ln() - (n.powf(ff) - 1.0).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.51 ; "barely online")]
    #[test_case(0.85 ; "default")]
    #[test_case(0.99 ; "almost batch")]
    fn test_mass_strictly_increases(ff: f64) {
        let mut mass = 0.0;
        for n in 2..10_000 {
            let inc = mass_increment(n, ff);
            assert!(inc.is_finite());
            assert!(inc > 0.0, "no growth at n = {}", n);
            mass += inc;
        }
        assert!(mass.is_finite());
    }

    #[test]
    fn test_first_fragment_is_finite() {
        assert_eq!(mass_increment(0, 0.85), 0.0);
        assert_eq!(mass_increment(1, 0.85), 0.0);
        let first = mass_increment(2, 0.85);
        assert!(first.is_finite() && first > 0.0);
    }

    #[test]
    fn test_batch_weighting_is_flat() {
        for n in [2, 3, 100, 1_000_000] {
            assert!(mass_increment(n, 1.0).abs() < 1e-9);
        }
    }
}

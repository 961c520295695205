use rand::Rng;

/// Dice rolls driving every weighted choice of the grammar.
pub trait Dice: Rng {
    fn d6(&mut self) -> u32 {
        self.gen_range(1..=6)
    }

    fn d20(&mut self) -> u32 {
        self.gen_range(1..=20)
    }

    fn d42(&mut self) -> u32 {
        self.gen_range(1..=42)
    }

    fn d100(&mut self) -> u32 {
        self.gen_range(1..=100)
    }

    fn d1000(&mut self) -> u32 {
        self.gen_range(1..=1000)
    }
}

impl<R: Rng + ?Sized> Dice for R {}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn rolls_stay_within_faces() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10_000 {
            assert!((1..=6).contains(&rng.d6()));
            assert!((1..=20).contains(&rng.d20()));
            assert!((1..=42).contains(&rng.d42()));
            assert!((1..=100).contains(&rng.d100()));
            assert!((1..=1000).contains(&rng.d1000()));
        }
    }

    #[test]
    fn every_face_shows_up() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut seen = [false; 6];
        for _ in 0..1_000 {
            seen[rng.d6() as usize - 1] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}

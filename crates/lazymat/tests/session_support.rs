#![allow(dead_code)]

use anyhow::Result;
use lazymat::{HostMatrix, Session, SessionConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Opens a session on the reference backend and closes it when dropped, even if the test
/// body panics first.
pub struct SessionFixture {
    pub session: Session,
}

impl SessionFixture {
    pub fn open() -> Result<Self> {
        lazymat::logging::init_for_tests();
        lazymat_backend_ref_cpu::register_cpu_backend();
        let session = Session::open_with(SessionConfig::new().backend("cpu"))?;
        Ok(SessionFixture { session })
    }
}

impl Drop for SessionFixture {
    fn drop(&mut self) {
        if !self.session.is_closed() {
            let _ = self.session.close();
        }
    }
}

pub fn seeded_rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

/// Uniform `[0, 1)` matrix, mirroring a `rand(rows, cols)` reference input.
pub fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> HostMatrix {
    let data = (0..rows * cols).map(|_| rng.gen::<f64>()).collect();
    HostMatrix::from_vec(rows, cols, data).expect("length matches shape")
}

/// Random shape with both extents in `[1, 25)`.
pub fn random_shape(rng: &mut StdRng) -> (usize, usize) {
    (rng.gen_range(1..25), rng.gen_range(1..25))
}

//! Live adapter for the `IdGenerator` port.

use uuid::Uuid;

use crate::ports::IdGenerator;

const RUN_ID_LEN: usize = 12;

/// Live generator backed by random v4 UUIDs.
#[derive(Default)]
pub struct LiveIdGenerator;

impl IdGenerator for LiveIdGenerator {
    fn run_id(&self) -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(RUN_ID_LEN);
        id
    }

    fn secret(&self) -> String {
        // Two UUIDs give 244 random bits.
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }
}

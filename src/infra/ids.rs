use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use uuid::Uuid;

use crate::application::repos::IdGenerator;
use crate::domain::paste::PasteId;

const SHORT_ID_BYTES: usize = 6;

/// Random URL-safe ids: 22 characters when long, 8 when short.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn new_id(&self, long: bool) -> PasteId {
        let bytes = Uuid::new_v4().into_bytes();
        let used = if long { &bytes[..] } else { &bytes[..SHORT_ID_BYTES] };
        PasteId::from_trusted(URL_SAFE_NO_PAD.encode(used))
    }
}

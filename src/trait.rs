use chrono::{DateTime, Utc};

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait Expired {
    fn expired(&self, clock: &dyn Clock) -> bool;
}

/// A link stays valid through the whole of its final second.
impl Expired for DateTime<Utc> {
    fn expired(&self, clock: &dyn Clock) -> bool {
        (self.timestamp() - clock.now().timestamp()).is_negative()
    }
}

impl Expired for i64 {
    fn expired(&self, clock: &dyn Clock) -> bool {
        (self - clock.now().timestamp()).is_negative()
    }
}

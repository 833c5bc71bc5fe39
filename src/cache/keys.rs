use uuid::Uuid;

pub struct CacheKeys;

impl CacheKeys {
    /// Window for a credential: ratewin:key:{id}
    ///
    /// The braces are a Redis hash tag so a credential's window always lives in
    /// one cluster slot.
    pub fn credential_window(api_key_id: Uuid) -> String {
        format!("ratewin:key:{{{}}}", api_key_id)
    }

    /// Window for a network address: ratewin:addr:{addr}
    pub fn address_window(addr: &str) -> String {
        format!("ratewin:addr:{}", addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_disjoint() {
        let id = Uuid::nil();
        assert_eq!(
            CacheKeys::credential_window(id),
            "ratewin:key:{00000000-0000-0000-0000-000000000000}"
        );
        assert_eq!(CacheKeys::address_window("10.0.0.1"), "ratewin:addr:10.0.0.1");
    }
}

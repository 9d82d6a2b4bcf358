//! Unit tests for the allocator

#[cfg(test)]
mod tests {
    use crate::allocator::{Allocator, PoolUsage};
    use crate::error::AllocationError;
    use crate::events::{EventType, Reason, ServiceEvent};
    use crate::pool::{Pool, PoolRegistry};
    use crate::service::{ServiceRecord, ASSIGNED_IP_ANNOTATION};
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn registry(pools: &[(&str, &[&str])]) -> PoolRegistry {
        PoolRegistry::new(
            pools
                .iter()
                .map(|(name, cidrs)| Pool::parse(*name, *cidrs).unwrap())
                .collect(),
        )
        .unwrap()
    }

    fn allocate(allocator: &Allocator, svc: &mut ServiceRecord) -> Result<IpAddr, AllocationError> {
        let mut events: Vec<ServiceEvent> = Vec::new();
        allocator.allocate(svc, &mut events)
    }

    #[test]
    fn test_allocates_sequentially_across_cidrs() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/31", "198.51.100.8/31"])]));
        let mut got = Vec::new();
        for i in 0..4 {
            let mut svc = ServiceRecord::new(format!("default/svc-{i}"));
            got.push(allocate(&allocator, &mut svc).unwrap());
        }
        assert_eq!(
            got,
            vec![ip("192.0.2.0"), ip("192.0.2.1"), ip("198.51.100.8"), ip("198.51.100.9")]
        );
    }

    #[test]
    fn test_allocation_stamps_annotation_and_emits_event() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        let mut svc = ServiceRecord::new("default/web");
        let mut events: Vec<ServiceEvent> = Vec::new();
        let got = allocator.allocate(&mut svc, &mut events).unwrap();

        assert_eq!(got, ip("192.0.2.0"));
        assert_eq!(svc.annotations.get(ASSIGNED_IP_ANNOTATION).map(String::as_str), Some("192.0.2.0"));
        assert_eq!(
            events,
            vec![ServiceEvent {
                event_type: EventType::Normal,
                reason: Reason::IPAllocated,
                message: "Assigned IP \"192.0.2.0\"".to_string(),
            }]
        );
    }

    #[test]
    fn test_explicit_address() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/24"])]));
        let mut svc = ServiceRecord::new("default/web").with_load_balancer_ip("192.0.2.42");
        assert_eq!(allocate(&allocator, &mut svc), Ok(ip("192.0.2.42")));
        assert_eq!(allocator.owner(&ip("192.0.2.42")).as_deref(), Some("default/web"));
    }

    #[test]
    fn test_explicit_address_wins_over_requested_pool() {
        let allocator = Allocator::new(registry(&[
            ("a", &["192.0.2.0/30"]),
            ("b", &["198.51.100.0/30"]),
        ]));
        let mut svc = ServiceRecord::new("default/web")
            .with_pool("a")
            .with_load_balancer_ip("198.51.100.2");
        assert_eq!(allocate(&allocator, &mut svc), Ok(ip("198.51.100.2")));
    }

    #[test]
    fn test_invalid_explicit_address() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        let mut svc = ServiceRecord::new("default/web").with_load_balancer_ip("192.0.2.300");
        let mut events: Vec<ServiceEvent> = Vec::new();
        assert_eq!(
            allocator.allocate(&mut svc, &mut events),
            Err(AllocationError::InvalidRequestedAddress {
                address: "192.0.2.300".to_string(),
                source: "192.0.2.300".parse::<IpAddr>().unwrap_err(),
            })
        );
        assert!(events.is_empty());
        assert!(allocator.is_empty());
        assert_eq!(svc.assigned_ip(), None);
    }

    #[test]
    fn test_explicit_address_owned_by_other_service() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        let mut first = ServiceRecord::new("default/first").with_load_balancer_ip("192.0.2.1");
        allocate(&allocator, &mut first).unwrap();

        // The address is inside a pool the second service could use, but
        // ownership is checked first.
        let mut second = ServiceRecord::new("default/second").with_load_balancer_ip("192.0.2.1");
        assert_eq!(
            allocate(&allocator, &mut second),
            Err(AllocationError::AddressInUse {
                address: ip("192.0.2.1"),
                owner: "default/first".to_string(),
            })
        );
        assert_eq!(allocator.entries(), vec![("default/first".to_string(), ip("192.0.2.1"))]);
        assert_eq!(second.assigned_ip(), None);
    }

    #[test]
    fn test_explicit_address_outside_pools() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        let mut svc = ServiceRecord::new("default/web").with_load_balancer_ip("203.0.113.7");
        assert_eq!(
            allocate(&allocator, &mut svc),
            Err(AllocationError::OutsidePools(ip("203.0.113.7")))
        );
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_assign_is_idempotent() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        let mut svc = ServiceRecord::new("default/web");
        let mut events: Vec<ServiceEvent> = Vec::new();
        allocator.assign(&mut svc, ip("192.0.2.2"), &mut events).unwrap();
        allocator.assign(&mut svc, ip("192.0.2.2"), &mut events).unwrap();
        assert_eq!(allocator.len(), 1);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_assign_moves_key_to_new_address() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        let mut svc = ServiceRecord::new("default/web");
        let mut events: Vec<ServiceEvent> = Vec::new();
        allocator.assign(&mut svc, ip("192.0.2.1"), &mut events).unwrap();
        allocator.assign(&mut svc, ip("192.0.2.2"), &mut events).unwrap();
        assert_eq!(allocator.owner(&ip("192.0.2.1")), None);
        assert_eq!(allocator.assigned("default/web"), Some(ip("192.0.2.2")));
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_unknown_pool() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        let mut svc = ServiceRecord::new("default/web").with_pool("missing");
        assert_eq!(
            allocate(&allocator, &mut svc),
            Err(AllocationError::UnknownPool("missing".to_string()))
        );
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_requested_pool_exhaustion_does_not_fall_back() {
        let allocator = Allocator::new(registry(&[
            ("small", &["192.0.2.0/32"]),
            ("large", &["198.51.100.0/24"]),
        ]));
        let mut first = ServiceRecord::new("default/first").with_pool("small");
        assert_eq!(allocate(&allocator, &mut first), Ok(ip("192.0.2.0")));

        let mut second = ServiceRecord::new("default/second").with_pool("small");
        assert_eq!(
            allocate(&allocator, &mut second),
            Err(AllocationError::PoolExhausted("small".to_string()))
        );
        assert_eq!(allocator.len(), 1);
    }

    #[test]
    fn test_unconstrained_searches_pools_in_order() {
        let allocator = Allocator::new(registry(&[
            ("first", &["192.0.2.0/32"]),
            ("second", &["198.51.100.0/32"]),
        ]));
        let mut a = ServiceRecord::new("default/a");
        let mut b = ServiceRecord::new("default/b");
        let mut c = ServiceRecord::new("default/c");
        assert_eq!(allocate(&allocator, &mut a), Ok(ip("192.0.2.0")));
        assert_eq!(allocate(&allocator, &mut b), Ok(ip("198.51.100.0")));
        assert_eq!(allocate(&allocator, &mut c), Err(AllocationError::NoAddressesAvailable));
        assert_eq!(allocator.len(), 2);
    }

    #[test]
    fn test_no_pools_means_no_addresses() {
        let allocator = Allocator::new(PoolRegistry::default());
        let mut svc = ServiceRecord::new("default/web");
        assert_eq!(allocate(&allocator, &mut svc), Err(AllocationError::NoAddressesAvailable));
    }

    #[test]
    fn test_top_of_address_space_is_exhausted_not_wrapped() {
        // next_ip(255.255.255.255) is 0.0.0.0; the CIDR bound must stop the
        // walk there instead of the iterator.
        let allocator = Allocator::new(registry(&[("top", &["255.255.255.254/31"])]));
        for key in ["default/a", "default/b"] {
            let mut svc = ServiceRecord::new(key);
            allocate(&allocator, &mut svc).unwrap();
        }
        let mut svc = ServiceRecord::new("default/c").with_pool("top");
        assert_eq!(
            allocate(&allocator, &mut svc),
            Err(AllocationError::PoolExhausted("top".to_string()))
        );
        assert_eq!(allocator.owner(&ip("0.0.0.0")), None);
    }

    #[test]
    fn test_clear_resets_service_and_state() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        let mut svc = ServiceRecord::new("default/web");
        allocate(&allocator, &mut svc).unwrap();
        svc.ingress = vec!["192.0.2.0".to_string()];

        allocator.clear(&mut svc);
        assert!(allocator.is_empty());
        assert_eq!(svc.assigned_ip(), None);
        assert!(svc.ingress.is_empty());

        // Clearing again is a no-op.
        allocator.clear(&mut svc);
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_release() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        let mut svc = ServiceRecord::new("default/web");
        allocate(&allocator, &mut svc).unwrap();
        assert_eq!(allocator.release("default/web"), Some(ip("192.0.2.0")));
        assert_eq!(allocator.release("default/web"), None);
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_restore() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        allocator.restore("default/a", ip("192.0.2.2")).unwrap();
        assert_eq!(
            allocator.restore("default/b", ip("192.0.2.2")),
            Err(AllocationError::AddressInUse {
                address: ip("192.0.2.2"),
                owner: "default/a".to_string(),
            })
        );
        assert_eq!(
            allocator.restore("default/c", ip("203.0.113.1")),
            Err(AllocationError::OutsidePools(ip("203.0.113.1")))
        );

        // A restored address is skipped by later searches.
        let mut svc = ServiceRecord::new("default/d");
        allocator.assign(&mut svc, ip("192.0.2.0"), &mut Vec::<ServiceEvent>::new()).unwrap();
        let mut svc = ServiceRecord::new("default/e");
        allocator.assign(&mut svc, ip("192.0.2.1"), &mut Vec::<ServiceEvent>::new()).unwrap();
        let mut svc = ServiceRecord::new("default/f");
        assert_eq!(allocate(&allocator, &mut svc), Ok(ip("192.0.2.3")));
    }

    #[test]
    fn test_set_pools_prunes_addresses_outside_new_pools() {
        let allocator = Allocator::new(registry(&[
            ("keep", &["192.0.2.0/30"]),
            ("drop", &["198.51.100.0/30"]),
        ]));
        let mut a = ServiceRecord::new("default/a").with_pool("keep");
        let mut b = ServiceRecord::new("default/b").with_pool("drop");
        allocate(&allocator, &mut a).unwrap();
        allocate(&allocator, &mut b).unwrap();

        let dropped = allocator.set_pools(registry(&[("keep", &["192.0.2.0/30"])]));
        assert_eq!(dropped, vec![("default/b".to_string(), ip("198.51.100.0"))]);
        assert_eq!(allocator.entries(), vec![("default/a".to_string(), ip("192.0.2.0"))]);
        assert_eq!(allocator.pools().len(), 1);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_pool_usage() {
        let allocator = Allocator::new(registry(&[
            ("a", &["192.0.2.0/30"]),
            ("b", &["198.51.100.0/29"]),
        ]));
        for key in ["default/x", "default/y"] {
            let mut svc = ServiceRecord::new(key).with_pool("b");
            allocate(&allocator, &mut svc).unwrap();
        }
        assert_eq!(
            allocator.pool_usage(),
            vec![
                PoolUsage { name: "a".to_string(), total: 4, allocated: 0 },
                PoolUsage { name: "b".to_string(), total: 8, allocated: 2 },
            ]
        );
    }

    #[test]
    fn test_is_valid() {
        let allocator = Allocator::new(registry(&[("default", &["192.0.2.0/30"])]));
        assert!(allocator.is_valid(&ip("192.0.2.3")));
        assert!(!allocator.is_valid(&ip("192.0.2.4")));
    }
}

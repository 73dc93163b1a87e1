//! Unit tests for the allocator module

#[cfg(test)]
mod tests {
    use crate::allocator::SubnetAllocator;
    use crate::error::IpamError;
    use crate::ipam_trait::IpamManager;
    use crate::test_utils::create_test_subnet;
    use crate::types::IpFamilyMode;
    use crds::{Address, IPInstance, IPInstanceSpec, IPInstanceStatus, IPPhase, IPVersion};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn engine_with(subnets: &[(&str, &str, &str)]) -> SubnetAllocator {
        let engine = SubnetAllocator::new();
        for (name, network, cidr) in subnets {
            engine.upsert_subnet(&create_test_subnet(name, network, cidr), None).unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_unique() {
        // /28 leaves 14 allocatable addresses
        let engine = Arc::new(engine_with(&[("s1", "net", "10.0.0.0/28")]));

        let mut handles = Vec::new();
        for i in 0..14 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .allocate(IpFamilyMode::IPv4, "net", &[], &format!("pod-{i}"), "default")
                    .await
            }));
        }

        let mut seen = BTreeSet::new();
        for handle in handles {
            let ips = handle.await.unwrap().unwrap();
            assert_eq!(ips.len(), 1);
            assert!(seen.insert(ips[0].ip()), "address handed out twice: {}", ips[0]);
        }
        assert_eq!(seen.len(), 14);

        let exhausted = engine.allocate(IpFamilyMode::IPv4, "net", &[], "pod-15", "default").await;
        assert!(matches!(exhausted, Err(IpamError::NoAvailableIP { .. })));
    }

    #[tokio::test]
    async fn test_dual_stack_allocates_v4_first() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24"), ("v6", "net", "fd00::/120")]);

        let ips = engine
            .allocate(IpFamilyMode::DualStack, "net", &[], "web-0", "default")
            .await
            .unwrap();

        assert_eq!(ips.len(), 2);
        assert_eq!(ips[0].version(), IPVersion::V4);
        assert_eq!(ips[1].version(), IPVersion::V6);
        assert_eq!(ips[0].address.prefix_len(), 24);
    }

    #[tokio::test]
    async fn test_dual_stack_failure_rolls_back_v4() {
        // No IPv6 subnet in the network
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24")]);

        let result = engine
            .allocate(IpFamilyMode::DualStack, "net", &[], "web-0", "default")
            .await;

        assert!(matches!(result, Err(IpamError::NoAvailableIP { version: IPVersion::V6, .. })));
        assert_eq!(engine.used_count("v4").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_network() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24")]);
        let result = engine.allocate(IpFamilyMode::IPv4, "other", &[], "p", "default").await;
        assert!(matches!(result, Err(IpamError::NetworkNotFound(_))));
    }

    #[tokio::test]
    async fn test_subnet_hint_is_honoured() {
        let engine = engine_with(&[("a", "net", "10.0.0.0/24"), ("b", "net", "10.1.0.0/24")]);

        let ips = engine
            .allocate(IpFamilyMode::IPv4, "net", &["b".to_string()], "p", "default")
            .await
            .unwrap();
        assert_eq!(ips[0].subnet, "b");
        assert_eq!(ips[0].ip().to_string(), "10.1.0.1");
    }

    #[tokio::test]
    async fn test_subnet_hint_of_wrong_family_rejected() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24"), ("v6", "net", "fd00::/120")]);

        let result = engine
            .allocate(IpFamilyMode::IPv4, "net", &["v6".to_string()], "p", "default")
            .await;
        assert!(matches!(result, Err(IpamError::SubnetNotFound(_))));
    }

    #[tokio::test]
    async fn test_assign_rejects_foreign_owner_unless_forced() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24")]);
        let candidates = vec!["10.0.0.7".to_string()];

        engine
            .assign(IpFamilyMode::IPv4, "net", &[], &candidates, "web-0", "default", false)
            .await
            .unwrap();

        let taken = engine
            .assign(IpFamilyMode::IPv4, "net", &[], &candidates, "web-1", "default", false)
            .await;
        assert!(matches!(taken, Err(IpamError::IPInUse { .. })));

        let forced = engine
            .assign(IpFamilyMode::IPv4, "net", &[], &candidates, "web-1", "default", true)
            .await
            .unwrap();
        assert_eq!(forced.ips[0].ip().to_string(), "10.0.0.7");
        assert!(forced.newly_used.is_empty(), "taken over, not newly used");
        assert_eq!(engine.used_count("v4").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_assign_count_must_match_family() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24")]);
        let result = engine
            .assign(IpFamilyMode::DualStack, "net", &[], &["10.0.0.7".to_string()], "p", "default", false)
            .await;
        assert!(matches!(result, Err(IpamError::FamilyMismatch(_))));
    }

    #[tokio::test]
    async fn test_assign_partial_failure_keeps_prior_usage() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24"), ("v6", "net", "fd00::/120")]);
        engine
            .assign(IpFamilyMode::IPv4, "net", &[], &["10.0.0.7".to_string()], "web-0", "default", false)
            .await
            .unwrap();

        // v4 already held by the same owner, v6 outside every subnet
        let result = engine
            .assign(
                IpFamilyMode::DualStack,
                "net",
                &[],
                &["10.0.0.7".to_string(), "fd01::7".to_string()],
                "web-0",
                "default",
                false,
            )
            .await;

        assert!(matches!(result, Err(IpamError::NotAssignable { .. })));
        assert_eq!(engine.used_count("v4").unwrap(), 1);
        assert_eq!(engine.used_count("v6").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24")]);
        let ips = engine.allocate(IpFamilyMode::IPv4, "net", &[], "p", "default").await.unwrap();
        let raw = vec![ips[0].ip().to_string()];

        engine.release("net", &["v4".to_string()], &raw).await.unwrap();
        engine.release("net", &["v4".to_string()], &raw).await.unwrap();
        engine.release("net", &[], &raw).await.unwrap();
        assert_eq!(engine.used_count("v4").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restore_marks_instance_used() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24")]);
        let mut instance = IPInstance::new(
            "10-0-0-1",
            IPInstanceSpec {
                network: "net".to_string(),
                subnet: "v4".to_string(),
                address: Address {
                    ip: "10.0.0.1/24".to_string(),
                    mac: "02:00:00:00:00:01".to_string(),
                    gateway: None,
                    version: IPVersion::V4,
                    net_id: None,
                },
            },
        );
        instance.metadata.namespace = Some("default".to_string());

        engine.restore(&instance).unwrap();
        assert_eq!(engine.used_count("v4").unwrap(), 1);

        // The restored address is skipped by fresh allocations
        let ips = engine.allocate(IpFamilyMode::IPv4, "net", &[], "p", "default").await.unwrap();
        assert_eq!(ips[0].ip().to_string(), "10.0.0.2");
    }

    fn bound_instance(ip: &str, pod_name: &str) -> IPInstance {
        let mut instance = IPInstance::new(
            &crds::instance_name(ip),
            IPInstanceSpec {
                network: "net".to_string(),
                subnet: "v4".to_string(),
                address: Address {
                    ip: format!("{ip}/24"),
                    mac: "02:00:00:00:00:01".to_string(),
                    gateway: None,
                    version: IPVersion::V4,
                    net_id: None,
                },
            },
        );
        instance.metadata.namespace = Some("default".to_string());
        instance.status = Some(IPInstanceStatus {
            pod_name: Some(pod_name.to_string()),
            pod_namespace: Some("default".to_string()),
            phase: Some(IPPhase::Using),
            ..Default::default()
        });
        instance
    }

    #[tokio::test]
    async fn test_release_instance_frees_address_of_its_pod() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24")]);
        let ips = engine.allocate(IpFamilyMode::IPv4, "net", &[], "p1", "default").await.unwrap();
        let instance = bound_instance(&ips[0].ip().to_string(), "p1");

        assert!(engine.release_instance(&instance).unwrap());
        assert_eq!(engine.used_count("v4").unwrap(), 0);

        // A second delete notification is a no-op
        assert!(!engine.release_instance(&instance).unwrap());
    }

    #[tokio::test]
    async fn test_release_instance_keeps_address_reassigned_elsewhere() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24")]);
        let candidates = vec!["10.0.0.9".to_string()];
        engine
            .assign(IpFamilyMode::IPv4, "net", &[], &candidates, "q", "default", false)
            .await
            .unwrap();

        // Late delete of an old binding of the same address held by p1
        let stale = bound_instance("10.0.0.9", "p1");
        assert!(!engine.release_instance(&stale).unwrap());
        assert_eq!(engine.used_count("v4").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_assign_reports_newly_used_addresses() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24"), ("v6", "net", "fd00::/120")]);
        engine
            .assign(IpFamilyMode::IPv4, "net", &[], &["10.0.0.7".to_string()], "web-0", "default", false)
            .await
            .unwrap();

        let assignment = engine
            .assign(
                IpFamilyMode::DualStack,
                "net",
                &[],
                &["10.0.0.7".to_string(), "fd00::7".to_string()],
                "web-0",
                "default",
                true,
            )
            .await
            .unwrap();

        assert_eq!(assignment.ips.len(), 2);
        assert_eq!(assignment.newly_used.len(), 1);
        assert_eq!(assignment.newly_used[0].ip().to_string(), "fd00::7");
    }

    #[tokio::test]
    async fn test_upsert_keeps_usage() {
        let engine = engine_with(&[("v4", "net", "10.0.0.0/24")]);
        engine.allocate(IpFamilyMode::IPv4, "net", &[], "p", "default").await.unwrap();

        engine
            .upsert_subnet(&create_test_subnet("v4", "net", "10.0.0.0/24"), Some(100))
            .unwrap();
        assert_eq!(engine.used_count("v4").unwrap(), 1);

        engine.remove_subnet("v4").unwrap();
        assert!(matches!(engine.used_count("v4"), Err(IpamError::SubnetNotFound(_))));
    }
}

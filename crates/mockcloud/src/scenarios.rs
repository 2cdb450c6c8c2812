//! End-to-end runs of the engine against the mock provider

use crate::cloud::{Fault, IngressRequest, MockCloud, Operation, Tags};
use crate::tasks::{SecurityGroup, SecurityGroupRule, Vpc};
use converge::{
    Action, ApiTarget, BlockReason, ConfigurationError, DryRunTarget, Error, ErrorCategory,
    Lifecycle, RunContext, RunOptions, SkipCause, TaskError, TaskOutcome, TaskSet, TaskState,
    check_no_changes, run_tasks,
};
use std::sync::Arc;

struct Network {
    vpc: Arc<Vpc>,
    sg: Arc<SecurityGroup>,
    tasks: TaskSet<MockCloud>,
}

/// Fresh task objects for one VPC with one security group
fn network() -> Network {
    let vpc = Arc::new(Vpc::new("vpc1").cidr("172.20.0.0/16"));
    let sg = Arc::new(SecurityGroup::new("sg1", &vpc).description("Description"));

    let mut tasks = TaskSet::new();
    tasks.insert(Arc::clone(&sg)).unwrap();
    tasks.insert(Arc::clone(&vpc)).unwrap();
    Network { vpc, sg, tasks }
}

fn apply(cloud: &MockCloud, tasks: &TaskSet<MockCloud>) -> converge::RunReport {
    run_tasks(cloud, &ApiTarget, tasks, RunOptions::default()).unwrap()
}

fn open(cloud: &MockCloud, group_id: &str, port: i64) {
    cloud
        .authorize_ingress(
            group_id,
            &IngressRequest {
                protocol: "tcp".into(),
                from_port: Some(port),
                to_port: Some(port),
                cidr: Some("0.0.0.0/0".into()),
            },
        )
        .unwrap();
}

#[test]
fn test_security_group_create_then_no_op() {
    let cloud = MockCloud::new();

    let first = network();
    let report = apply(&cloud, &first.tasks);
    assert!(report.is_success(), "{report:?}");

    let sg_id = first.sg.id().expect("ID not set after create");
    let groups = cloud.describe_security_groups().unwrap();
    assert_eq!(groups.len(), 1);

    let mut tags = Tags::new();
    tags.insert("Name".into(), "sg1".into());
    let group = &groups[0];
    assert_eq!(group.id, sg_id);
    assert_eq!(group.group_name, "sg1");
    assert_eq!(group.description, "Description");
    assert_eq!(Some(group.vpc_id.as_str()), first.vpc.id());
    assert_eq!(group.tags, tags);

    let second = network();
    check_no_changes(&cloud, &second.tasks, RunOptions::default()).unwrap();
    assert_eq!(second.sg.id(), Some(sg_id));
}

#[test]
fn test_plan_makes_no_provider_changes() {
    let cloud = MockCloud::new();
    let net = network();
    let rule = SecurityGroupRule::new("sg1-https", &net.sg).port(443);
    let mut tasks = net.tasks;
    tasks.insert(Arc::new(rule)).unwrap();

    let target = DryRunTarget::new();
    let report = run_tasks(&cloud, &target, &tasks, RunOptions::default()).unwrap();

    assert!(report.is_success());
    let actions: Vec<(String, Action)> = target
        .changes()
        .into_iter()
        .map(|c| (c.task, c.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("vpc1".to_string(), Action::Create),
            ("sg1".to_string(), Action::Create),
            ("sg1-https".to_string(), Action::Create),
        ]
    );
    assert_eq!(cloud.mutating_calls(), 0);
    assert!(net.vpc.id().is_none());
}

#[test]
fn test_dependency_ids_flow_to_dependents() {
    let cloud = MockCloud::new();
    let net = network();
    let rule = Arc::new(
        SecurityGroupRule::new("sg1-ssh", &net.sg)
            .port(22)
            .cidr("10.0.0.0/8"),
    );
    let mut tasks = net.tasks;
    tasks.insert(Arc::clone(&rule)).unwrap();

    let options = RunOptions {
        workers: 8,
        ..RunOptions::default()
    };
    let report = run_tasks(&cloud, &ApiTarget, &tasks, options).unwrap();
    assert!(report.is_success());

    let permissions = cloud.describe_ingress(net.sg.id().unwrap()).unwrap();
    assert_eq!(permissions.len(), 1);
    assert_eq!(rule.id(), Some(permissions[0].id.as_str()));
}

#[test]
fn test_many_groups_converge_concurrently() {
    let cloud = MockCloud::new();
    let build = || {
        let vpc = Arc::new(Vpc::new("shared").cidr("10.0.0.0/16"));
        let mut tasks = TaskSet::new();
        for i in 0..12 {
            let sg = Arc::new(SecurityGroup::new(format!("sg{i}"), &vpc).description("tier"));
            tasks.insert(sg).unwrap();
        }
        tasks.insert(vpc).unwrap();
        tasks
    };

    let options = RunOptions {
        workers: 4,
        ..RunOptions::default()
    };
    let report = run_tasks(&cloud, &ApiTarget, &build(), options.clone()).unwrap();
    assert_eq!(report.summary().created, 13);
    assert_eq!(cloud.calls(Operation::CreateVpc), 1);
    assert_eq!(cloud.calls(Operation::CreateSecurityGroup), 12);

    check_no_changes(&cloud, &build(), options).unwrap();
}

#[test]
fn test_failure_is_isolated_to_its_branch() {
    let cloud = MockCloud::new();
    cloud.inject(Operation::CreateSecurityGroup, Fault::Unavailable);

    let net = network();
    let rule = SecurityGroupRule::new("sg1-ssh", &net.sg).port(22);
    let other = Vpc::new("vpc2").cidr("10.2.0.0/16");
    let mut tasks = net.tasks;
    tasks.insert(Arc::new(rule)).unwrap();
    tasks.insert(Arc::new(other)).unwrap();

    let report = apply(&cloud, &tasks);
    assert!(!report.is_success());
    assert_eq!(report.state("vpc1"), Some(TaskState::Succeeded));
    assert_eq!(report.state("vpc2"), Some(TaskState::Succeeded));
    assert_eq!(report.state("sg1"), Some(TaskState::Failed));

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.category(), ErrorCategory::Apply);
    assert!(failures[0].1.to_string().contains("service unavailable"));

    let skipped = report.skipped();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].0, "sg1-ssh");
    assert_eq!(skipped[0].1.blocked_by(), Some("sg1"));
    assert_eq!(cloud.calls(Operation::AuthorizeSecurityGroupIngress), 0);

    // Once the provider recovers, a re-run converges
    cloud.clear_fault(Operation::CreateSecurityGroup);
    let net = network();
    let rule = SecurityGroupRule::new("sg1-ssh", &net.sg).port(22);
    let mut tasks = net.tasks;
    tasks.insert(Arc::new(rule)).unwrap();
    tasks
        .insert(Arc::new(Vpc::new("vpc2").cidr("10.2.0.0/16")))
        .unwrap();
    assert!(apply(&cloud, &tasks).is_success());
}

#[test]
fn test_invalid_removal_rule_rejected_before_discovery() {
    let cloud = MockCloud::new();
    let vpc = Arc::new(Vpc::new("vpc1").cidr("172.20.0.0/16"));
    let sg = Arc::new(SecurityGroup::new("sg1", &vpc).remove_extra_rule("port=22-23"));
    let mut tasks = TaskSet::new();
    tasks.insert(vpc).unwrap();
    tasks.insert(sg).unwrap();

    let err = run_tasks(&cloud, &ApiTarget, &tasks, RunOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Configuration(ConfigurationError::InvalidRemovalRule { .. })
    ));
    assert_eq!(cloud.total_calls(), 0);
}

#[test]
fn test_insufficient_access_is_a_warning() {
    let cloud = MockCloud::new();
    cloud.inject(Operation::DescribeVpcs, Fault::AccessDenied);

    let vpc = Arc::new(
        Vpc::new("shared")
            .cidr("10.0.0.0/16")
            .lifecycle(Lifecycle::WarnIfInsufficientAccess),
    );
    let mut tasks = TaskSet::new();
    tasks.insert(vpc).unwrap();

    let report = apply(&cloud, &tasks);
    assert!(report.is_success());
    assert!(matches!(
        report.outcome("shared"),
        Some(TaskOutcome::Skipped {
            cause: SkipCause::InsufficientAccess { .. }
        })
    ));
    assert_eq!(report.warnings().len(), 1);
    assert_eq!(cloud.mutating_calls(), 0);
}

#[test]
fn test_access_denied_fails_a_sync_task() {
    let cloud = MockCloud::new();
    cloud.inject(Operation::DescribeVpcs, Fault::AccessDenied);

    let net = network();
    let report = apply(&cloud, &net.tasks);

    assert!(!report.is_success());
    match report.outcome("vpc1") {
        Some(TaskOutcome::Failed { error }) => {
            assert!(matches!(error, TaskError::Discovery(_)));
            assert!(error.is_retryable());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.state("sg1"), Some(TaskState::Skipped));
}

#[test]
fn test_skipped_dependency_tolerance() {
    let cloud = MockCloud::new();
    let existing = cloud.create_vpc("10.0.0.0/16", &Tags::new()).unwrap();
    cloud.inject(Operation::DescribeVpcs, Fault::AccessDenied);

    let build = || {
        let vpc = Arc::new(
            Vpc::new("shared")
                .with_id(existing.id.clone())
                .lifecycle(Lifecycle::WarnIfInsufficientAccess),
        );
        let sg = Arc::new(SecurityGroup::new("web", &vpc).description("web"));
        let mut tasks = TaskSet::new();
        tasks.insert(vpc).unwrap();
        tasks.insert(sg).unwrap();
        tasks
    };

    let report = apply(&cloud, &build());
    match report.outcome("web") {
        Some(TaskOutcome::Skipped {
            cause: SkipCause::Blocked { reason, .. },
        }) => assert_eq!(*reason, BlockReason::Skipped),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!report.is_success());

    let options = RunOptions {
        tolerate_skipped_dependencies: true,
        ..RunOptions::default()
    };
    let report = run_tasks(&cloud, &ApiTarget, &build(), options).unwrap();
    assert!(report.is_success(), "{report:?}");
    assert_eq!(cloud.describe_security_groups().unwrap().len(), 1);
}

#[test]
fn test_exists_and_validates_requires_the_vpc() {
    let cloud = MockCloud::new();
    let vpc = Arc::new(Vpc::new("vpc1").lifecycle(Lifecycle::ExistsAndValidates));
    let sg = Arc::new(SecurityGroup::new("sg1", &vpc));
    let mut tasks = TaskSet::new();
    tasks.insert(vpc).unwrap();
    tasks.insert(sg).unwrap();

    let report = apply(&cloud, &tasks);
    match report.outcome("vpc1") {
        Some(TaskOutcome::Failed { error }) => {
            assert_eq!(error.category(), ErrorCategory::Lifecycle);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.state("sg1"), Some(TaskState::Skipped));
    assert_eq!(cloud.mutating_calls(), 0);
}

#[test]
fn test_exists_and_warn_if_changes_never_corrects() {
    let cloud = MockCloud::new();
    let mut tags = Tags::new();
    tags.insert("Name".into(), "vpc1".into());
    cloud.create_vpc("172.20.0.0/16", &tags).unwrap();

    let build = || {
        let vpc = Arc::new(
            Vpc::new("vpc1")
                .tag("team", "network")
                .lifecycle(Lifecycle::ExistsAndWarnIfChanges),
        );
        let sg = Arc::new(SecurityGroup::new("sg1", &vpc).description("Description"));
        let mut tasks = TaskSet::new();
        tasks.insert(vpc).unwrap();
        tasks.insert(sg).unwrap();
        tasks
    };

    let report = apply(&cloud, &build());
    assert!(report.is_success());
    assert!(report.outcome("vpc1").unwrap().is_tainted());
    assert_eq!(report.state("sg1"), Some(TaskState::Succeeded));
    assert_eq!(cloud.calls(Operation::CreateTags), 0);
    assert_eq!(cloud.calls(Operation::CreateSecurityGroup), 1);

    let options = RunOptions {
        block_on_tainted_dependencies: true,
        ..RunOptions::default()
    };
    let report = run_tasks(&cloud, &ApiTarget, &build(), options).unwrap();
    assert_eq!(report.state("sg1"), Some(TaskState::Skipped));
}

#[test]
fn test_prune_revokes_only_undeclared_matching_permissions() {
    let cloud = MockCloud::new();
    let vpc = Arc::new(Vpc::new("vpc1").cidr("172.20.0.0/16"));
    let sg = Arc::new(
        SecurityGroup::new("sg1", &vpc)
            .description("Description")
            .remove_extra_rule("port=22")
            .remove_extra_rule("port=3389"),
    );
    let rdp = Arc::new(
        SecurityGroupRule::new("sg1-rdp", &sg)
            .port(3389)
            .cidr("0.0.0.0/0"),
    );
    let mut tasks = TaskSet::new();
    tasks.insert(Arc::clone(&vpc)).unwrap();
    tasks.insert(Arc::clone(&sg)).unwrap();
    tasks.insert(rdp).unwrap();

    assert!(apply(&cloud, &tasks).is_success());
    let group_id = sg.id().unwrap().to_string();
    open(&cloud, &group_id, 22);
    open(&cloud, &group_id, 443);

    // A dry run records the revocation without making it
    let target = DryRunTarget::new();
    let report = RunContext::new(&cloud, &target)
        .run_deletions(&tasks)
        .unwrap();
    assert!(report.is_success());
    let changes = target.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].action, Action::Delete);
    assert_eq!(cloud.describe_ingress(&group_id).unwrap().len(), 3);

    let report = RunContext::new(&cloud, &ApiTarget)
        .run_deletions(&tasks)
        .unwrap();
    assert_eq!(report.summary().deleted, 1);

    let ports: Vec<Option<i64>> = cloud
        .describe_ingress(&group_id)
        .unwrap()
        .iter()
        .map(|p| p.from_port)
        .collect();
    assert_eq!(ports.len(), 2);
    assert!(ports.contains(&Some(443)));
    assert!(ports.contains(&Some(3389)));
}

#[test]
fn test_pinned_vpc_is_not_recreated_under_its_dependents() {
    let cloud = MockCloud::new();
    let existing = cloud.create_vpc("10.0.0.0/16", &Tags::new()).unwrap();

    let vpc = Arc::new(
        Vpc::new("main")
            .cidr("10.1.0.0/16")
            .with_id(existing.id.clone()),
    );
    let sg = Arc::new(SecurityGroup::new("web", &vpc).description("web"));
    let mut tasks = TaskSet::new();
    tasks.insert(Arc::clone(&vpc)).unwrap();
    tasks.insert(sg).unwrap();

    let report = apply(&cloud, &tasks);
    match report.outcome("main") {
        Some(TaskOutcome::Failed { error }) => assert_eq!(error.category(), ErrorCategory::Apply),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.state("web"), Some(TaskState::Skipped));
    assert_eq!(cloud.describe_vpcs().unwrap(), vec![existing.clone()]);
    assert_eq!(cloud.calls(Operation::DeleteVpc), 0);
    assert_eq!(vpc.id(), Some(existing.id.as_str()));
}

#[test]
fn test_created_vpc_id_reaches_dependents() {
    let cloud = MockCloud::new();
    let net = network();
    assert!(apply(&cloud, &net.tasks).is_success());
    let vpc_id = net.vpc.id().unwrap().to_string();

    // The network is replaced out of band; fresh tasks recreate it
    cloud.delete_security_group(net.sg.id().unwrap()).unwrap();
    cloud.delete_vpc(&vpc_id).unwrap();
    let net = network();
    assert!(apply(&cloud, &net.tasks).is_success());

    let created = net.vpc.id().unwrap();
    assert_ne!(created, vpc_id);
    assert_eq!(cloud.describe_security_groups().unwrap()[0].vpc_id, created);
    check_no_changes(&cloud, &network().tasks, RunOptions::default()).unwrap();
}

#[test]
fn test_prune_with_freshly_built_tasks() {
    let cloud = MockCloud::new();
    let build = || {
        let vpc = Arc::new(Vpc::new("vpc1").cidr("172.20.0.0/16"));
        let sg = Arc::new(SecurityGroup::new("sg1", &vpc).remove_extra_rule("port=22"));
        let mut tasks = TaskSet::new();
        tasks.insert(vpc).unwrap();
        tasks.insert(Arc::clone(&sg)).unwrap();
        (sg, tasks)
    };

    let (sg, tasks) = build();
    assert!(apply(&cloud, &tasks).is_success());
    let group_id = sg.id().unwrap().to_string();
    open(&cloud, &group_id, 22);

    // No run_tasks on these objects: the deletion pass discovers the group
    let (_, fresh) = build();
    let report = RunContext::new(&cloud, &ApiTarget)
        .run_deletions(&fresh)
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.summary().deleted, 1);
    assert!(cloud.describe_ingress(&group_id).unwrap().is_empty());
}

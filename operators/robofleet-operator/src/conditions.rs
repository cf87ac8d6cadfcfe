//! 条件存储
//!
//! 在内存中操作租户状态里的条件列表。条件按类型唯一，更新原地进行，
//! 列表保持首次插入的顺序。

use chrono::{DateTime, Utc};

use crate::crd::{ConditionStatus, Tenant, TenantCondition, TenantConditionType, TenantStatus};

/// 租户是否处于给定类型的 True 条件
pub fn in_condition(tenant: &Tenant, condition_type: TenantConditionType) -> bool {
    find_condition(tenant, condition_type)
        .map(|c| c.status == ConditionStatus::True)
        .unwrap_or(false)
}

/// 查找给定类型的条件
pub fn find_condition(
    tenant: &Tenant,
    condition_type: TenantConditionType,
) -> Option<&TenantCondition> {
    tenant
        .status
        .as_ref()?
        .conditions
        .iter()
        .find(|c| c.type_ == condition_type)
}

/// 以当前时间设置条件
pub fn set_condition(
    tenant: &mut Tenant,
    condition_type: TenantConditionType,
    status: ConditionStatus,
    message: impl Into<String>,
) {
    set_condition_at(tenant, condition_type, status, message, Utc::now());
}

/// 添加或更新条件
///
/// `last_update_time` 在状态或说明变化时更新，`last_transition_time` 只在状态翻转时更新。
/// 内容完全相同的重复调用不会改动任何时间戳。
pub fn set_condition_at(
    tenant: &mut Tenant,
    condition_type: TenantConditionType,
    status: ConditionStatus,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    let message = message.into();
    let conditions = &mut tenant
        .status
        .get_or_insert_with(TenantStatus::default)
        .conditions;

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition_type) {
        if existing.status != status || existing.message != message {
            existing.last_update_time = now;
        }
        if existing.status != status {
            existing.last_transition_time = now;
        }
        existing.status = status;
        existing.message = message;
        return;
    }

    conditions.push(TenantCondition {
        type_: condition_type,
        status,
        message,
        last_update_time: now,
        last_transition_time: now,
    });
}

/// 所有已记录的条件是否都为 True
pub fn all_conditions_true(tenant: &Tenant) -> bool {
    tenant
        .status
        .as_ref()
        .map(|s| s.conditions.iter().all(|c| c.status == ConditionStatus::True))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::TenantSpec;
    use chrono::Duration;
    use rstest::rstest;

    fn test_tenant() -> Tenant {
        Tenant::new("test-tenant", TenantSpec::default())
    }

    #[rstest]
    #[case::initial_false(None, false)]
    #[case::initial_true(None, true)]
    #[case::false_to_true(Some(false), true)]
    #[case::true_to_false(Some(true), false)]
    #[case::stays_true(Some(true), true)]
    fn test_set_condition_result(#[case] previous: Option<bool>, #[case] expected: bool) {
        let mut tenant = test_tenant();
        if let Some(previous) = previous {
            set_condition(&mut tenant, TenantConditionType::Namespace, previous.into(), "Test Condition");
        }
        set_condition(&mut tenant, TenantConditionType::Namespace, expected.into(), "Test Condition");

        assert_eq!(in_condition(&tenant, TenantConditionType::Namespace), expected);
        assert_eq!(tenant.status.as_ref().unwrap().conditions.len(), 1);
    }

    #[test]
    fn test_identical_update_keeps_timestamps() {
        let mut tenant = test_tenant();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);

        set_condition_at(&mut tenant, TenantConditionType::Domain, ConditionStatus::True, "ok", t0);
        set_condition_at(&mut tenant, TenantConditionType::Domain, ConditionStatus::True, "ok", t1);

        let condition = find_condition(&tenant, TenantConditionType::Domain).unwrap();
        assert_eq!(condition.last_update_time, t0);
        assert_eq!(condition.last_transition_time, t0);
    }

    #[test]
    fn test_status_change_updates_both_timestamps() {
        let mut tenant = test_tenant();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);

        set_condition_at(&mut tenant, TenantConditionType::Domain, ConditionStatus::False, "ok", t0);
        set_condition_at(&mut tenant, TenantConditionType::Domain, ConditionStatus::True, "ok", t1);

        let condition = find_condition(&tenant, TenantConditionType::Domain).unwrap();
        assert_eq!(condition.last_update_time, t1);
        assert_eq!(condition.last_transition_time, t1);
    }

    #[test]
    fn test_message_change_updates_only_update_time() {
        let mut tenant = test_tenant();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);

        set_condition_at(&mut tenant, TenantConditionType::Domain, ConditionStatus::False, "等待中", t0);
        set_condition_at(&mut tenant, TenantConditionType::Domain, ConditionStatus::False, "仍在等待", t1);

        let condition = find_condition(&tenant, TenantConditionType::Domain).unwrap();
        assert_eq!(condition.last_update_time, t1);
        assert_eq!(condition.last_transition_time, t0);
        assert_eq!(condition.message, "仍在等待");
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let mut tenant = test_tenant();
        set_condition(&mut tenant, TenantConditionType::Domain, ConditionStatus::True, "a");
        set_condition(&mut tenant, TenantConditionType::Namespace, ConditionStatus::True, "b");
        set_condition(&mut tenant, TenantConditionType::Domain, ConditionStatus::False, "c");

        let types: Vec<_> = tenant
            .status
            .as_ref()
            .unwrap()
            .conditions
            .iter()
            .map(|c| c.type_)
            .collect();
        assert_eq!(types, vec![TenantConditionType::Domain, TenantConditionType::Namespace]);
        assert!(!all_conditions_true(&tenant));
    }
}

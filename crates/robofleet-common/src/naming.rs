//! 租户命名规则
//!
//! 租户拥有的所有集群对象都以确定性的名称从租户名推导而来。
//! 这里的函数均为纯函数：同样的输入永远得到同样的输出。

use rand::Rng;

/// 默认租户名称，映射到集群的基础命名空间
pub const DEFAULT_TENANT_NAME: &str = "default";
/// 集群基础命名空间
pub const BASE_NAMESPACE: &str = "default";
/// 非默认租户命名空间前缀
pub const TENANT_PREFIX: &str = "t-";
/// 机器人配置命名空间（基础命名空间对应的版本）
pub const ROBOT_CONFIG_NAMESPACE: &str = "robot-config";
/// 镜像拉取密钥名称
pub const IMAGE_PULL_SECRET: &str = "robofleet-images";
/// 机器人安装配置 ConfigMap 名称
pub const ROBOT_SETUP_CONFIGMAP: &str = "robot-setup";
/// 机器人服务账号
pub const ROBOT_SERVICE_ACCOUNT: &str = "robot-service";
/// 机器人安装服务账号
pub const ROBOT_SETUP_SERVICE_ACCOUNT: &str = "robot-service-setup";
/// 机器人集群令牌密钥前缀
pub const ROBOT_TOKEN_PREFIX: &str = "robot-token-";

/// 随机标签使用的字母表
const LABEL_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// 租户的主命名空间，租户的所有自定义资源都存放在这里
pub fn tenant_main_namespace(tenant_name: &str) -> String {
    if tenant_name == DEFAULT_TENANT_NAME {
        return BASE_NAMESPACE.to_string();
    }
    format!("{}{}", TENANT_PREFIX, tenant_name)
}

/// 租户机器人配置所在的命名空间
pub fn robot_config_namespace(tenant_main_namespace: &str) -> String {
    if tenant_main_namespace == BASE_NAMESPACE {
        return ROBOT_CONFIG_NAMESPACE.to_string();
    }
    format!("{}-{}", tenant_main_namespace, ROBOT_CONFIG_NAMESPACE)
}

/// 租户应用命名空间的前缀，以分隔符结尾
pub fn app_namespace_prefix(tenant_name: &str) -> String {
    if tenant_name == DEFAULT_TENANT_NAME {
        return "app-".to_string();
    }
    format!("{}-app-", tenant_main_namespace(tenant_name))
}

/// 判断命名空间是否归属于租户
///
/// 只匹配完整的路径段：主命名空间、机器人配置命名空间，或以 `-` 结尾的应用前缀。
/// 因此租户 `abc` 不会认领租户 `abc-xyz` 的命名空间。名称互为前缀的租户之间
/// 由 [`namespace_owner`] 裁决。
pub fn owns_namespace(tenant_name: &str, namespace: &str) -> bool {
    let main = tenant_main_namespace(tenant_name);
    namespace == main
        || namespace == robot_config_namespace(&main)
        || namespace.starts_with(&app_namespace_prefix(tenant_name))
}

/// 在已知租户中找出命名空间的归属租户
///
/// 租户 `abc` 的应用前缀 `t-abc-app-` 同时覆盖租户 `abc-app` 的全部命名空间，
/// 多个租户都能认领时取名称最长的一个，它的匹配更具体。
pub fn namespace_owner<'a, I>(namespace: &str, tenants: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    tenants
        .into_iter()
        .filter(|tenant| owns_namespace(tenant, namespace))
        .max_by_key(|tenant| tenant.len())
}

/// 从对象所在命名空间反推租户名称
pub fn tenant_for_object_namespace(namespace: &str) -> Option<String> {
    if namespace == BASE_NAMESPACE {
        return Some(DEFAULT_TENANT_NAME.to_string());
    }
    namespace
        .strip_prefix(TENANT_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// 租户 TLS 证书（以及对应密钥）的名称
pub fn certificate_name(tenant_name: &str) -> String {
    format!("{}{}-tls", TENANT_PREFIX, tenant_name)
}

/// 生成由小写字母组成的随机标签
pub fn random_label<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| char::from(LABEL_ALPHABET[rng.gen_range(0..LABEL_ALPHABET.len())]))
        .collect()
}

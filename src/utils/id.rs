//! 事件与备份 ID 生成
//!
//! 生命周期事件使用 10 位 62 进制 ID（0-9, a-z, A-Z），备份快照使用
//! 时间戳前缀加短 ID，便于按时间排序。

use chrono::Utc;
use rand::Rng;

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// ID 长度
pub const ID_LENGTH: usize = 10;

/// 生成 10 位 62 进制 ID
///
/// 时间戳（毫秒）与随机数异或后编码。
///
/// ```
/// use chips_app_manager::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let timestamp = Utc::now().timestamp_millis() as u64;
    let random: u64 = rand::thread_rng().gen();
    let mut value = timestamp ^ random;

    let mut result = [0u8; ID_LENGTH];
    for slot in result.iter_mut().rev() {
        *slot = BASE62_CHARS[(value % 62) as usize];
        value /= 62;
    }

    result.iter().map(|&b| b as char).collect()
}

/// 验证 ID 格式
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.bytes().all(|b| BASE62_CHARS.contains(&b))
}

/// 生成备份快照名称，形如 `20260101T120000-a1B2c3D4e5`
pub fn backup_label() -> String {
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), generate_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_format() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(is_valid_id(&id));
    }

    #[test]
    fn test_generate_id_uniqueness() {
        let ids: HashSet<_> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id("a1B2c3D4e5"));
        assert!(!is_valid_id("short"));
        assert!(!is_valid_id("a1B2c3D4e-"));
    }

    #[test]
    fn test_backup_label() {
        let label = backup_label();
        let (stamp, id) = label.split_once('-').unwrap();
        assert_eq!(stamp.len(), 15);
        assert!(is_valid_id(id));
    }
}

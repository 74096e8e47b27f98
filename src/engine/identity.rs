// ==========================================
// 血液申请履约引擎 - 身份服务接口
// ==========================================
// 职责: 受血者存在性校验 / 按血型查询献血者档案
// 说明: 身份与档案归外部服务所有, 引擎只读
// ==========================================

use crate::domain::actor::DonorRecord;
use std::collections::{BTreeSet, HashSet};
use std::error::Error;

/// 身份服务 Trait
pub trait IdentityProvider: Send + Sync {
    /// 受血者是否存在
    fn recipient_exists(&self, recipient_id: &str) -> Result<bool, Box<dyn Error + Send + Sync>>;

    /// 查询血型在集合内的献血者
    fn donors_with_blood_types(
        &self,
        blood_type_ids: &[String],
    ) -> Result<Vec<DonorRecord>, Box<dyn Error + Send + Sync>>;
}

// ==========================================
// StaticIdentityProvider - 内存身份服务
// ==========================================
// 用途: 嵌入式部署与测试
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    recipients: HashSet<String>,
    donors: Vec<DonorRecord>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipients.insert(recipient_id.into());
        self
    }

    pub fn with_donor(mut self, donor: DonorRecord) -> Self {
        self.donors.push(donor);
        self
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn recipient_exists(&self, recipient_id: &str) -> Result<bool, Box<dyn Error + Send + Sync>> {
        Ok(self.recipients.contains(recipient_id))
    }

    fn donors_with_blood_types(
        &self,
        blood_type_ids: &[String],
    ) -> Result<Vec<DonorRecord>, Box<dyn Error + Send + Sync>> {
        let wanted: BTreeSet<&str> = blood_type_ids.iter().map(String::as_str).collect();
        Ok(self
            .donors
            .iter()
            .filter(|d| wanted.contains(d.blood_type_id.as_str()))
            .cloned()
            .collect())
    }
}

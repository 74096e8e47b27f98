// ==========================================
// 血液申请履约引擎 - 参考数据仓储 (血型 / 成分)
// ==========================================
// 红线: 只读, 参考数据由 db::seed_reference_data 播种
// ==========================================

use crate::domain::blood::{BloodComponent, BloodType};
use crate::domain::types::{AboGroup, ComponentKind, RhFactor};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::parse_enum_column;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct ReferenceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ReferenceRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按血型ID查询血型
    pub fn find_blood_type_tx(conn: &Connection, blood_type_id: &str) -> RepositoryResult<Option<BloodType>> {
        let row = conn
            .query_row(
                "SELECT abo_group, rh_factor FROM blood_type WHERE blood_type_id = ?1",
                params![blood_type_id],
                |row| {
                    let abo: String = row.get(0)?;
                    let rh: String = row.get(1)?;
                    Ok(BloodType::new(
                        parse_enum_column::<AboGroup>(0, &abo)?,
                        parse_enum_column::<RhFactor>(1, &rh)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    /// 按成分ID查询成分
    pub fn find_component_tx(conn: &Connection, component_id: &str) -> RepositoryResult<Option<BloodComponent>> {
        let row = conn
            .query_row(
                "SELECT component_id, kind FROM blood_component WHERE component_id = ?1",
                params![component_id],
                |row| {
                    let kind: String = row.get(1)?;
                    Ok(BloodComponent {
                        component_id: row.get(0)?,
                        kind: parse_enum_column::<ComponentKind>(1, &kind)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn find_blood_type(&self, blood_type_id: &str) -> RepositoryResult<Option<BloodType>> {
        let conn = self.get_conn()?;
        Self::find_blood_type_tx(&conn, blood_type_id)
    }

    pub fn find_component(&self, component_id: &str) -> RepositoryResult<Option<BloodComponent>> {
        let conn = self.get_conn()?;
        Self::find_component_tx(&conn, component_id)
    }
}

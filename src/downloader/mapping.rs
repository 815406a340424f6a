use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::common::models::{DownloadType, ResourceId};
use crate::tasks::error::TaskError;

/// 资源到其进行中下载的映射
///
/// `task_id` 为空表示 `start` 已占位但远端尚未返回。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadMapping {
    pub remote_job_id: Option<String>,
    pub task_id: Option<String>,
    pub download_type: DownloadType,
}

impl DownloadMapping {
    pub fn is_pending(&self) -> bool {
        self.task_id.is_none()
    }
}

/// 每个资源至多一条映射
#[derive(Debug, Default)]
pub struct DownloadMappings {
    entries: DashMap<ResourceId, DownloadMapping>,
}

impl DownloadMappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为资源占位；已有映射（包括占位）时拒绝
    pub fn reserve(self: &Arc<Self>, resource: ResourceId) -> Result<MappingReservation, TaskError> {
        match self.entries.entry(resource) {
            Entry::Occupied(_) => Err(TaskError::AlreadyActive(resource)),
            Entry::Vacant(entry) => {
                entry.insert(DownloadMapping {
                    remote_job_id: None,
                    task_id: None,
                    download_type: resource.download_type(),
                });
                Ok(MappingReservation {
                    mappings: Arc::clone(self),
                    resource,
                    committed: false,
                })
            }
        }
    }

    /// 恢复时重建映射；资源已被其他任务占用时返回 false
    pub fn restore(&self, resource: ResourceId, remote_job_id: &str, task_id: &str) -> bool {
        match self.entries.entry(resource) {
            Entry::Occupied(entry) => entry.get().task_id.as_deref() == Some(task_id),
            Entry::Vacant(entry) => {
                entry.insert(DownloadMapping {
                    remote_job_id: Some(remote_job_id.to_string()),
                    task_id: Some(task_id.to_string()),
                    download_type: resource.download_type(),
                });
                true
            }
        }
    }

    /// 移除已确认的映射，占位中的不动
    pub fn remove_committed(&self, resource: &ResourceId) -> Option<DownloadMapping> {
        self.entries
            .remove_if(resource, |_, mapping| !mapping.is_pending())
            .map(|(_, mapping)| mapping)
    }

    /// 只在映射仍属于 `task_id` 时移除
    pub fn remove_if_task(&self, resource: &ResourceId, task_id: &str) -> bool {
        self.entries
            .remove_if(resource, |_, mapping| mapping.task_id.as_deref() == Some(task_id))
            .is_some()
    }

    pub fn get(&self, resource: &ResourceId) -> Option<DownloadMapping> {
        self.entries.get(resource).map(|entry| entry.clone())
    }

    pub fn contains(&self, resource: &ResourceId) -> bool {
        self.entries.contains_key(resource)
    }

    /// 某一类别下已确认的资源
    pub fn resources(&self, download_type: DownloadType) -> Vec<ResourceId> {
        let mut resources: Vec<ResourceId> = self
            .entries
            .iter()
            .filter(|entry| entry.download_type == download_type && !entry.is_pending())
            .map(|entry| *entry.key())
            .collect();
        resources.sort();
        resources
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `start` 期间的占位；未 `commit` 就被丢弃时自动释放
#[derive(Debug)]
pub struct MappingReservation {
    mappings: Arc<DownloadMappings>,
    resource: ResourceId,
    committed: bool,
}

impl MappingReservation {
    pub fn commit(mut self, remote_job_id: &str, task_id: &str) {
        self.mappings.entries.insert(
            self.resource,
            DownloadMapping {
                remote_job_id: Some(remote_job_id.to_string()),
                task_id: Some(task_id.to_string()),
                download_type: self.resource.download_type(),
            },
        );
        self.committed = true;
    }
}

impl Drop for MappingReservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if self
            .mappings
            .entries
            .remove_if(&self.resource, |_, mapping| mapping.is_pending())
            .is_some()
        {
            debug!("释放下载占位: {}", self.resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_reservation_for_a_resource_is_rejected() {
        let mappings = Arc::new(DownloadMappings::new());
        let first = mappings.reserve(ResourceId::Album(7)).unwrap();
        assert!(matches!(
            mappings.reserve(ResourceId::Album(7)),
            Err(TaskError::AlreadyActive(ResourceId::Album(7)))
        ));
        assert!(mappings.reserve(ResourceId::Album(8)).is_ok());
        drop(first);
    }

    #[test]
    fn dropped_reservation_releases_the_resource() {
        let mappings = Arc::new(DownloadMappings::new());
        drop(mappings.reserve(ResourceId::Vault).unwrap());
        assert!(!mappings.contains(&ResourceId::Vault));
    }

    #[test]
    fn committed_reservation_survives_drop() {
        let mappings = Arc::new(DownloadMappings::new());
        mappings
            .reserve(ResourceId::AppData)
            .unwrap()
            .commit("job-1", "app_data_export-1");

        let mapping = mappings.get(&ResourceId::AppData).unwrap();
        assert_eq!(mapping.task_id.as_deref(), Some("app_data_export-1"));
        assert_eq!(mapping.download_type, DownloadType::AppData);
        assert_eq!(mappings.resources(DownloadType::AppData), vec![ResourceId::AppData]);
    }

    #[test]
    fn pending_reservations_are_not_removable_as_committed() {
        let mappings = Arc::new(DownloadMappings::new());
        let reservation = mappings.reserve(ResourceId::Metadata).unwrap();
        assert!(mappings.remove_committed(&ResourceId::Metadata).is_none());
        assert!(mappings.resources(DownloadType::Metadata).is_empty());
        drop(reservation);
    }

    #[test]
    fn remove_if_task_ignores_other_owners() {
        let mappings = Arc::new(DownloadMappings::new());
        assert!(mappings.restore(ResourceId::Album(1), "job-1", "t-1"));
        assert!(mappings.restore(ResourceId::Album(1), "job-1", "t-1"));
        assert!(!mappings.restore(ResourceId::Album(1), "job-2", "t-2"));

        assert!(!mappings.remove_if_task(&ResourceId::Album(1), "t-2"));
        assert!(mappings.remove_if_task(&ResourceId::Album(1), "t-1"));
        assert!(mappings.is_empty());
    }
}

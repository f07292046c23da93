// Physical device selection
//
// Queue families are scored per role by how specialised they are, and devices
// are ranked by type plus the quality of the queues they offer. The scoring
// works on plain data so it can be tested without a GPU.

use super::surface::{Surface, SwapchainSupportDetails};
use anyhow::Result;
use ash::vk;
use std::ffi::CStr;

/// Queue roles the backend uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
    Present,
}

/// A queue family picked for one role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSelection {
    pub family: u32,
    pub quality: u32,
}

/// Best family per role; `None` if the device lacks that role entirely
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueInfos {
    pub graphics: Option<QueueSelection>,
    pub compute: Option<QueueSelection>,
    pub transfer: Option<QueueSelection>,
    pub present: Option<QueueSelection>,
}

fn graphics_quality(flags: vk::QueueFlags, present: bool) -> u32 {
    if !flags.contains(vk::QueueFlags::GRAPHICS) {
        0
    } else if flags.contains(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER) {
        if present {
            3
        } else {
            2
        }
    } else {
        1
    }
}

fn compute_quality(flags: vk::QueueFlags) -> u32 {
    if !flags.contains(vk::QueueFlags::COMPUTE) {
        0
    } else if flags.contains(vk::QueueFlags::GRAPHICS) {
        1
    } else if flags.contains(vk::QueueFlags::TRANSFER) {
        2
    } else {
        3
    }
}

fn transfer_quality(flags: vk::QueueFlags) -> u32 {
    if !flags.contains(vk::QueueFlags::TRANSFER) {
        0
    } else if flags.contains(vk::QueueFlags::GRAPHICS) {
        1
    } else if flags.contains(vk::QueueFlags::COMPUTE) {
        2
    } else {
        3
    }
}

// Strictly-better replaces, so ties keep the lowest family index
fn keep_best(best: &mut Option<QueueSelection>, family: u32, quality: u32) {
    if quality == 0 {
        return;
    }
    if best.map_or(true, |b| quality > b.quality) {
        *best = Some(QueueSelection { family, quality });
    }
}

impl QueueInfos {
    /// Score every family. `present_support[i]` tells whether family `i` can
    /// present to the target surface.
    pub fn find(families: &[vk::QueueFamilyProperties], present_support: &[bool]) -> Self {
        let mut infos = Self::default();

        for (index, family) in families.iter().enumerate() {
            if family.queue_count == 0 {
                continue;
            }
            let index = index as u32;
            let present = present_support.get(index as usize).copied().unwrap_or(false);
            let flags = family.queue_flags;

            keep_best(&mut infos.graphics, index, graphics_quality(flags, present));
            keep_best(&mut infos.compute, index, compute_quality(flags));
            keep_best(&mut infos.transfer, index, transfer_quality(flags));
        }

        let graphics_presents = infos
            .graphics
            .map_or(false, |g| present_support.get(g.family as usize).copied().unwrap_or(false));

        infos.present = if graphics_presents {
            infos.graphics.map(|g| QueueSelection { family: g.family, quality: 1 })
        } else {
            families
                .iter()
                .enumerate()
                .find(|(i, f)| f.queue_count > 0 && present_support.get(*i).copied().unwrap_or(false))
                .map(|(i, _)| QueueSelection { family: i as u32, quality: 1 })
        };

        infos
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some()
            && self.compute.is_some()
            && self.transfer.is_some()
            && self.present.is_some()
    }

    pub fn total_quality(&self) -> u32 {
        [self.graphics, self.compute, self.transfer, self.present]
            .iter()
            .flatten()
            .map(|s| s.quality)
            .sum()
    }

    /// Map each role onto a concrete (family, queue index).
    ///
    /// Returns `None` unless the infos are complete.
    pub fn assign(&self, families: &[vk::QueueFamilyProperties]) -> Option<QueueAssignment> {
        if !self.is_complete() {
            return None;
        }

        let mut used: Vec<u32> = vec![0; families.len()];
        let mut take = |family: u32| -> QueueSlot {
            let count = families[family as usize].queue_count.max(1);
            let used_here = &mut used[family as usize];
            let index = (*used_here).min(count - 1);
            if *used_here < count {
                *used_here += 1;
            }
            QueueSlot { family, index }
        };

        let graphics = take(self.graphics?.family);
        let compute = take(self.compute?.family);
        let transfer = take(self.transfer?.family);

        let present_family = self.present?.family;
        let present = if present_family == graphics.family {
            graphics
        } else {
            let slot = QueueSlot { family: present_family, index: 0 };
            if used[present_family as usize] == 0 {
                used[present_family as usize] = 1;
            }
            slot
        };

        let requests = used
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(family, &count)| QueueRequest { family: family as u32, count })
            .collect();

        Some(QueueAssignment {
            graphics,
            compute,
            transfer,
            present,
            requests,
        })
    }
}

/// One queue inside a family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSlot {
    pub family: u32,
    pub index: u32,
}

/// Number of queues to create in one family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRequest {
    pub family: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAssignment {
    pub graphics: QueueSlot,
    pub compute: QueueSlot,
    pub transfer: QueueSlot,
    pub present: QueueSlot,
    pub requests: Vec<QueueRequest>,
}

impl QueueAssignment {
    pub fn slot(&self, queue_type: QueueType) -> QueueSlot {
        match queue_type {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
            QueueType::Present => self.present,
        }
    }

    /// Distinct families, ascending
    pub fn unique_families(&self) -> Vec<u32> {
        self.requests.iter().map(|r| r.family).collect()
    }
}

/// Everything device ranking needs to know about one GPU
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub queues: QueueInfos,
    pub swapchain_extension: bool,
    pub swapchain_adequate: bool,
    pub sampler_anisotropy: bool,
}

impl DeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.queues.is_complete()
            && self.swapchain_extension
            && self.swapchain_adequate
            && self.sampler_anisotropy
    }

    pub fn score(&self) -> u32 {
        let type_weight = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
            vk::PhysicalDeviceType::CPU => 1,
            _ => 0,
        };
        type_weight + self.queues.total_quality()
    }
}

/// Index of the device to use, or `None` when nothing is suitable
pub fn select_device(candidates: &[DeviceCandidate], preferred: Option<&str>) -> Option<usize> {
    let preferred = preferred.map(str::trim).filter(|p| !p.is_empty());
    if let Some(preferred) = preferred {
        let needle = preferred.to_lowercase();
        let hit = candidates
            .iter()
            .position(|c| c.is_suitable() && c.name.to_lowercase().contains(&needle));
        match hit {
            Some(index) => return Some(index),
            None => log::warn!("Preferred GPU '{}' not found or unsuitable", preferred),
        }
    }

    let mut best: Option<(usize, u32)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        if !candidate.is_suitable() {
            continue;
        }
        let score = candidate.score();
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

/// Query a GPU's properties into a ranking candidate
pub fn describe_device(
    instance: &ash::Instance,
    surface: &Surface,
    handle: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    let properties = unsafe { instance.get_physical_device_properties(handle) };
    let features = unsafe { instance.get_physical_device_features(handle) };
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(handle) };

    let present_support = (0..queue_families.len() as u32)
        .map(|family| surface.supports_present(handle, family))
        .collect::<Result<Vec<_>>>()?;

    let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }?;
    let swapchain_extension = extensions.iter().any(|ext| unsafe {
        CStr::from_ptr(ext.extension_name.as_ptr()) == ash::extensions::khr::Swapchain::name()
    });

    let swapchain_adequate = swapchain_extension && {
        let details = SwapchainSupportDetails::query(surface, handle)?;
        !details.formats.is_empty() && !details.present_modes.is_empty()
    };

    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    Ok(DeviceCandidate {
        handle,
        name,
        device_type: properties.device_type,
        queues: QueueInfos::find(&queue_families, &present_support),
        queue_families,
        swapchain_extension,
        swapchain_adequate,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    })
}

/// Enumerate GPUs and pick the best one for `surface`
pub fn pick_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
    preferred: Option<&str>,
) -> Result<DeviceCandidate> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;

    if devices.is_empty() {
        anyhow::bail!("No Vulkan-capable GPU found");
    }

    let candidates = devices
        .into_iter()
        .map(|handle| describe_device(instance, surface, handle))
        .collect::<Result<Vec<_>>>()?;

    for candidate in &candidates {
        log::debug!(
            "GPU candidate: {} ({:?}) suitable={} score={}",
            candidate.name,
            candidate.device_type,
            candidate.is_suitable(),
            candidate.score()
        );
    }

    let index = select_device(&candidates, preferred)
        .ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))?;

    let mut candidates = candidates;
    Ok(candidates.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    const GCT: vk::QueueFlags = vk::QueueFlags::from_raw(0b111);
    const CT: vk::QueueFlags = vk::QueueFlags::from_raw(0b110);

    fn candidate(name: &str, device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        let families = vec![family(GCT, 1)];
        DeviceCandidate {
            handle: vk::PhysicalDevice::null(),
            name: name.to_string(),
            device_type,
            queues: QueueInfos::find(&families, &[true]),
            queue_families: families,
            swapchain_extension: true,
            swapchain_adequate: true,
            sampler_anisotropy: true,
        }
    }

    #[test]
    fn single_universal_family_serves_every_role() {
        let families = [family(GCT, 1)];
        let infos = QueueInfos::find(&families, &[true]);

        assert_eq!(infos.graphics, Some(QueueSelection { family: 0, quality: 3 }));
        assert_eq!(infos.compute, Some(QueueSelection { family: 0, quality: 1 }));
        assert_eq!(infos.transfer, Some(QueueSelection { family: 0, quality: 1 }));
        assert_eq!(infos.present.map(|p| p.family), Some(0));
        assert!(infos.is_complete());
    }

    #[test]
    fn dedicated_families_win_their_roles() {
        // Typical discrete layout: universal, async compute, DMA
        let families = [
            family(GCT, 16),
            family(CT, 8),
            family(vk::QueueFlags::TRANSFER, 2),
        ];
        let infos = QueueInfos::find(&families, &[true, false, false]);

        assert_eq!(infos.graphics.map(|s| s.family), Some(0));
        assert_eq!(infos.compute, Some(QueueSelection { family: 1, quality: 2 }));
        assert_eq!(infos.transfer, Some(QueueSelection { family: 2, quality: 3 }));
        assert_eq!(infos.present.map(|p| p.family), Some(0));
    }

    #[test]
    fn pure_compute_family_beats_compute_transfer() {
        let families = [
            family(GCT, 1),
            family(CT, 1),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        let infos = QueueInfos::find(&families, &[true, false, false]);
        assert_eq!(infos.compute, Some(QueueSelection { family: 2, quality: 3 }));
        assert_eq!(infos.transfer, Some(QueueSelection { family: 1, quality: 2 }));
    }

    #[test]
    fn graphics_prefers_presenting_family() {
        let families = [family(GCT, 1), family(GCT, 1)];
        let infos = QueueInfos::find(&families, &[false, true]);
        assert_eq!(infos.graphics, Some(QueueSelection { family: 1, quality: 3 }));
        assert_eq!(infos.present.map(|p| p.family), Some(1));
    }

    #[test]
    fn present_falls_back_to_other_family() {
        let families = [family(GCT, 1), family(vk::QueueFlags::TRANSFER, 1)];
        let infos = QueueInfos::find(&families, &[false, true]);
        assert_eq!(infos.graphics, Some(QueueSelection { family: 0, quality: 2 }));
        assert_eq!(infos.present.map(|p| p.family), Some(1));
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [family(GCT, 0), family(GCT, 1)];
        let infos = QueueInfos::find(&families, &[true, true]);
        assert_eq!(infos.graphics.map(|s| s.family), Some(1));
        assert_eq!(infos.present.map(|p| p.family), Some(1));
    }

    #[test]
    fn no_present_support_is_incomplete() {
        let families = [family(GCT, 4)];
        let infos = QueueInfos::find(&families, &[false]);
        assert!(infos.present.is_none());
        assert!(!infos.is_complete());
        assert!(infos.assign(&families).is_none());
    }

    #[test]
    fn shared_family_hands_out_distinct_queues() {
        let families = [family(GCT, 2)];
        let infos = QueueInfos::find(&families, &[true]);
        let assignment = infos.assign(&families).unwrap();

        assert_eq!(assignment.graphics, QueueSlot { family: 0, index: 0 });
        assert_eq!(assignment.compute, QueueSlot { family: 0, index: 1 });
        // Out of queues: transfer shares the last one
        assert_eq!(assignment.transfer, QueueSlot { family: 0, index: 1 });
        assert_eq!(assignment.present, assignment.graphics);
        assert_eq!(assignment.requests, vec![QueueRequest { family: 0, count: 2 }]);
    }

    #[test]
    fn separate_families_get_one_queue_each() {
        let families = [
            family(GCT, 16),
            family(CT, 8),
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let infos = QueueInfos::find(&families, &[false, false, false, true]);
        let assignment = infos.assign(&families).unwrap();

        assert_eq!(assignment.graphics, QueueSlot { family: 0, index: 0 });
        assert_eq!(assignment.compute, QueueSlot { family: 1, index: 0 });
        assert_eq!(assignment.transfer, QueueSlot { family: 2, index: 0 });
        assert_eq!(assignment.present, QueueSlot { family: 3, index: 0 });
        assert_eq!(assignment.unique_families(), vec![0, 1, 2, 3]);
        assert!(assignment.requests.iter().all(|r| r.count == 1));
    }

    #[test]
    fn discrete_outranks_integrated() {
        let candidates = [
            candidate("Intel UHD", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("GeForce RTX", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(select_device(&candidates, None), Some(1));
    }

    #[test]
    fn ties_keep_first_device() {
        let candidates = [
            candidate("GPU A", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("GPU B", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(select_device(&candidates, None), Some(0));
    }

    #[test]
    fn unsuitable_devices_are_never_chosen() {
        let mut discrete = candidate("GeForce RTX", vk::PhysicalDeviceType::DISCRETE_GPU);
        discrete.swapchain_extension = false;
        let mut cpu = candidate("llvmpipe", vk::PhysicalDeviceType::CPU);
        cpu.sampler_anisotropy = false;

        assert_eq!(select_device(&[discrete.clone(), cpu.clone()], None), None);

        let integrated = candidate("Intel UHD", vk::PhysicalDeviceType::INTEGRATED_GPU);
        assert_eq!(select_device(&[discrete, integrated, cpu], None), Some(1));
    }

    #[test]
    fn preferred_name_overrides_score() {
        let candidates = [
            candidate("GeForce RTX", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("Intel UHD", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ];
        assert_eq!(select_device(&candidates, Some("intel")), Some(1));
        // Unknown preference falls back to ranking
        assert_eq!(select_device(&candidates, Some("radeon")), Some(0));
    }

    #[test]
    fn blank_preference_falls_back_to_ranking() {
        let candidates = [
            candidate("Intel UHD", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("GeForce RTX", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(select_device(&candidates, Some("")), Some(1));
        assert_eq!(select_device(&candidates, Some("   ")), Some(1));
        // Surrounding whitespace is ignored for real names
        assert_eq!(select_device(&candidates, Some(" intel ")), Some(0));
    }

    #[test]
    fn better_queues_break_type_ties() {
        let plain = candidate("GPU A", vk::PhysicalDeviceType::DISCRETE_GPU);
        let mut rich = candidate("GPU B", vk::PhysicalDeviceType::DISCRETE_GPU);
        rich.queue_families = vec![family(GCT, 1), family(vk::QueueFlags::TRANSFER, 1)];
        rich.queues = QueueInfos::find(&rich.queue_families, &[true, false]);

        assert!(rich.score() > plain.score());
        assert_eq!(select_device(&[plain, rich], None), Some(1));
    }
}

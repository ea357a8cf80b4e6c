//! Memory type selection

use ash::vk;

use super::{VulkanError, VulkanResult};

/// Find the first memory type allowed by `type_filter` that has every requested property
///
/// Types are checked in the order the device declares them; the first match wins.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);

    (0..count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && (memory_properties.memory_types[i as usize].property_flags & properties) == properties
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in props.memory_types.iter_mut().zip(flags) {
            *slot = vk::MemoryType { property_flags, heap_index: 0 };
        }
        props
    }

    #[test]
    fn test_only_second_type_matches() {
        let props = table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&props, 0b11, wanted).unwrap(), 1);
    }

    #[test]
    fn test_bitmask_excludes_matching_type() {
        let props = table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        // Both types have the flags, only index 1 is allowed by the requirements.
        assert_eq!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 1);
    }

    #[test]
    fn test_first_match_wins_over_better_fit() {
        let props = table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 0);
    }

    #[test]
    fn test_superset_required() {
        let props = table(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert!(matches!(find_memory_type(&props, 0b1, wanted), Err(VulkanError::NoSuitableMemoryType)));
    }

    #[test]
    fn test_chosen_index_satisfies_both_conditions() {
        let props = table(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        ]);
        let wanted = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ];

        for bits in 1u32..16 {
            for &flags in &wanted {
                if let Ok(index) = find_memory_type(&props, bits, flags) {
                    assert_ne!(bits & (1 << index), 0);
                    assert_eq!(props.memory_types[index as usize].property_flags & flags, flags);
                }
            }
        }
    }
}

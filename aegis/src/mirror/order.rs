use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use aegis_ipc::{WindowId, WindowInfo};

/// Per-space window order, recomputed only when a space's set of window
/// ids changes. Focus or attribute changes alone never reorder.
#[derive(Debug, Default)]
pub struct WindowOrderCache {
    tolerance: f64,
    spaces: HashMap<u32, SpaceOrder>,
}

#[derive(Debug, Default)]
struct SpaceOrder {
    ids: HashSet<WindowId>,
    order: Vec<WindowId>,
}

impl WindowOrderCache {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            spaces: HashMap::new(),
        }
    }

    /// Bring the cache in line with a fresh window list.
    /// Returns the spaces whose order was recomputed.
    pub fn update(&mut self, windows: &[WindowInfo]) -> Vec<u32> {
        let mut grouped: HashMap<u32, Vec<&WindowInfo>> = HashMap::new();
        for window in windows {
            grouped.entry(window.space).or_default().push(window);
        }

        // Spaces that lost all their windows
        for space in self.spaces.keys().copied().collect::<Vec<_>>() {
            grouped.entry(space).or_default();
        }

        let mut recomputed = Vec::new();
        for (space, members) in grouped {
            let ids: HashSet<WindowId> = members.iter().map(|w| w.id).collect();
            let unchanged = self
                .spaces
                .get(&space)
                .is_some_and(|cached| cached.ids == ids);
            if unchanged {
                continue;
            }

            let order = stable_order(&members, self.tolerance);
            tracing::debug!("Window order for space {} recomputed: {:?}", space, order);
            self.spaces.insert(space, SpaceOrder { ids, order });
            recomputed.push(space);
        }
        recomputed.sort_unstable();
        recomputed
    }

    /// Drop entries for spaces that no longer exist.
    pub fn prune(&mut self, live_spaces: &HashSet<u32>) {
        self.spaces.retain(|space, _| live_spaces.contains(space));
    }

    pub fn order(&self, space: u32) -> Option<&[WindowId]> {
        self.spaces.get(&space).map(|s| s.order.as_slice())
    }
}

/// Order windows left to right. Windows whose x origins fall within
/// `tolerance` of a cluster's first window form a visual stack and are
/// ordered by stack index, then id.
pub fn stable_order(windows: &[&WindowInfo], tolerance: f64) -> Vec<WindowId> {
    let mut by_x: Vec<&WindowInfo> = windows.to_vec();
    by_x.sort_by(|a, b| {
        a.frame
            .x
            .partial_cmp(&b.frame.x)
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });

    let mut result = Vec::with_capacity(by_x.len());
    let mut cluster: Vec<&WindowInfo> = Vec::new();
    let mut anchor = f64::NEG_INFINITY;

    for window in by_x {
        if !cluster.is_empty() && (window.frame.x - anchor).abs() > tolerance {
            flush_cluster(&mut cluster, &mut result);
        }
        if cluster.is_empty() {
            anchor = window.frame.x;
        }
        cluster.push(window);
    }
    flush_cluster(&mut cluster, &mut result);

    result
}

fn flush_cluster(cluster: &mut Vec<&WindowInfo>, out: &mut Vec<WindowId>) {
    cluster.sort_by_key(|w| (w.stack_index, w.id));
    out.extend(cluster.drain(..).map(|w| w.id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_ipc::Frame;

    fn window(id: WindowId, space: u32, x: f64, stack_index: u32) -> WindowInfo {
        WindowInfo {
            id,
            pid: 100,
            app: "App".to_string(),
            title: format!("Window {}", id),
            space,
            frame: Frame {
                x,
                y: 0.0,
                w: 400.0,
                h: 300.0,
            },
            role: "AXWindow".to_string(),
            subrole: "AXStandardWindow".to_string(),
            has_focus: false,
            is_minimized: false,
            is_hidden: false,
            is_floating: false,
            is_native_fullscreen: false,
            stack_index,
        }
    }

    #[test]
    fn test_orders_by_horizontal_position() {
        let a = window(1, 1, 800.0, 0);
        let b = window(2, 1, 0.0, 0);
        let c = window(3, 1, 400.0, 0);
        assert_eq!(stable_order(&[&a, &b, &c], 10.0), vec![2, 3, 1]);
    }

    #[test]
    fn test_stack_tie_break_uses_stack_index() {
        let a = window(1, 1, 100.0, 2);
        let b = window(2, 1, 105.0, 1);
        assert_eq!(stable_order(&[&a, &b], 10.0), vec![2, 1]);
    }

    #[test]
    fn test_equal_position_and_stack_index_breaks_on_id() {
        let a = window(9, 1, 100.0, 0);
        let b = window(4, 1, 100.0, 0);
        assert_eq!(stable_order(&[&a, &b], 10.0), vec![4, 9]);
    }

    #[test]
    fn test_outside_tolerance_is_not_a_stack() {
        let a = window(1, 1, 100.0, 2);
        let b = window(2, 1, 120.0, 1);
        assert_eq!(stable_order(&[&a, &b], 10.0), vec![1, 2]);
    }

    #[test]
    fn test_cache_ignores_attribute_only_changes() {
        let mut cache = WindowOrderCache::new(10.0);
        let windows = vec![window(1, 1, 0.0, 0), window(2, 1, 500.0, 0)];
        assert_eq!(cache.update(&windows), vec![1]);
        assert_eq!(cache.order(1), Some(&[1, 2][..]));

        // Same ids, window 1 moved to the right: order is kept
        let mut moved = windows.clone();
        moved[0].frame.x = 900.0;
        moved[0].has_focus = true;
        assert!(cache.update(&moved).is_empty());
        assert_eq!(cache.order(1), Some(&[1, 2][..]));
    }

    #[test]
    fn test_cache_recomputes_on_set_change() {
        let mut cache = WindowOrderCache::new(10.0);
        cache.update(&[window(1, 1, 500.0, 0), window(2, 2, 0.0, 0)]);

        let recomputed = cache.update(&[
            window(1, 1, 500.0, 0),
            window(3, 1, 0.0, 0),
            window(2, 2, 0.0, 0),
        ]);
        assert_eq!(recomputed, vec![1]);
        assert_eq!(cache.order(1), Some(&[3, 1][..]));
        assert_eq!(cache.order(2), Some(&[2][..]));
    }

    #[test]
    fn test_space_emptied_is_recomputed() {
        let mut cache = WindowOrderCache::new(10.0);
        cache.update(&[window(1, 1, 0.0, 0), window(2, 2, 0.0, 0)]);
        assert_eq!(cache.update(&[window(1, 1, 0.0, 0)]), vec![2]);
        assert_eq!(cache.order(2), Some(&[][..]));
    }

    #[test]
    fn test_prune_removes_destroyed_spaces() {
        let mut cache = WindowOrderCache::new(10.0);
        cache.update(&[window(1, 1, 0.0, 0), window(2, 3, 0.0, 0)]);
        cache.prune(&HashSet::from([1]));
        assert!(cache.order(1).is_some());
        assert!(cache.order(3).is_none());
    }
}

use super::dijkstra::{bounded_dijkstra, ShortestPathEntry};
use super::network::{Network, PointId};
use crate::algorithm;
use log::{debug, info};
use rayon::prelude::*;

/**
 * 预计算的 tower point 之间的最短路缓存
 * 对任意两点 (tower 或 pillar) 的距离与路径查询, 通过所在 edge 的端点转换为 tower 之间的查询。
 */
pub struct ShortestPathCache {
    entries: Vec<ShortestPathEntry>, // 下标即 tower point 的 PointId
    max_distance: f64,
}

// 一次查询选中的走法
enum Choice {
    // 同一个点
    Stay,
    // 同一条 edge 上顺着方向直接到达
    Along,
    // 经由 exit -> entry 两个 tower point
    Via {
        distance: f64,
        exit: PointId,
        entry: PointId,
    },
}

impl ShortestPathCache {
    /// 对每个 tower point 运行一次有界 dijkstra, 按起点并行
    pub fn compute_all(network: &Network, max_distance: f64) -> Self {
        info!(
            "precompute shortest path between {} tower points, max distance {}",
            network.tower_count(),
            max_distance
        );
        let entries: Vec<ShortestPathEntry> = (0..network.tower_count())
            .into_par_iter()
            .map(|i| bounded_dijkstra(network, PointId(i), max_distance))
            .collect();
        let routes: usize = entries.iter().map(|e| e.len()).sum();
        info!("finish precompute shortest path, {} routes cached", routes);
        ShortestPathCache {
            entries,
            max_distance,
        }
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    fn tower_distance(&self, from: PointId, to: PointId) -> Option<f64> {
        if from == to {
            return Some(0.0);
        }
        self.entries.get(from.0)?.distance(to)
    }

    /// 任意两点之间的最短距离, 阈值内不可达时为 f64::INFINITY
    pub fn distance(&self, network: &Network, from: PointId, to: PointId) -> f64 {
        match self.choose(network, from, to) {
            Some(Choice::Stay) => 0.0,
            Some(Choice::Along) => {
                algorithm::distance(network.point(from).coord(), network.point(to).coord())
            }
            Some(Choice::Via { distance, .. }) => distance,
            None => f64::INFINITY,
        }
    }

    /// 任意两点之间的最短路径, 不含起点, 含终点; 不可达时为 None
    pub fn path(&self, network: &Network, from: PointId, to: PointId) -> Option<Vec<PointId>> {
        let mut path = Vec::new();
        match self.choose(network, from, to)? {
            Choice::Stay => {}
            Choice::Along => {
                // 同一条 edge 上才会直接到达
                if let Some(edge) = network.point(from).edge() {
                    path.extend(network.pillars_between(edge, from, to));
                }
                path.push(to);
            }
            Choice::Via { exit, entry, .. } => {
                if let Some(edge) = network.point(from).edge() {
                    path.extend(network.pillars_between(edge, from, exit));
                    path.push(exit);
                }
                let towers = if exit == entry {
                    &[][..]
                } else {
                    self.entries.get(exit.0)?.path(entry)?
                };
                path.extend_from_slice(towers);
                if let Some(edge) = network.point(to).edge() {
                    path.extend(network.pillars_between(edge, entry, to));
                    path.push(to);
                }
            }
        }
        Some(path)
    }

    fn choose(&self, network: &Network, from: PointId, to: PointId) -> Option<Choice> {
        let p1 = network.point(from);
        let p2 = network.point(to);
        if p1.key() == p2.key() {
            return Some(Choice::Stay);
        }
        if let (Some(e1), Some(e2)) = (p1.edge(), p2.edge()) {
            if e1 == e2 {
                let edge = network.edge(e1);
                let ahead = p1.offset() < p2.offset();
                if (ahead && edge.is_forward()) || (!ahead && edge.is_backward()) {
                    return Some(Choice::Along);
                }
            }
        }

        let mut best: Option<Choice> = None;
        let mut best_distance = f64::INFINITY;
        for (exit, exit_cost) in self.exits(network, from) {
            for (entry, entry_cost) in self.entries_of(network, to) {
                let d = match self.tower_distance(exit, entry) {
                    Some(d) => d + exit_cost + entry_cost,
                    None => continue,
                };
                if d < best_distance {
                    best_distance = d;
                    best = Some(Choice::Via {
                        distance: d,
                        exit,
                        entry,
                    });
                }
            }
        }
        if best.is_none() {
            debug!("no path from {:?} to {:?} within {}", from, to, self.max_distance);
        }
        best
    }

    // 离开起点所在 edge 的 tower point 及代价
    fn exits(&self, network: &Network, from: PointId) -> Vec<(PointId, f64)> {
        let point = network.point(from);
        let edge = match point.edge() {
            Some(edge) => network.edge(edge),
            None => return vec![(from, 0.0)],
        };
        let mut exits = Vec::with_capacity(2);
        if edge.is_forward() {
            exits.push((edge.adj(), edge.length() - point.offset()));
        }
        if edge.is_backward() {
            exits.push((edge.base(), point.offset()));
        }
        exits
    }

    // 进入终点所在 edge 的 tower point 及代价
    fn entries_of(&self, network: &Network, to: PointId) -> Vec<(PointId, f64)> {
        let point = network.point(to);
        let edge = match point.edge() {
            Some(edge) => network.edge(edge),
            None => return vec![(to, 0.0)],
        };
        let mut entries = Vec::with_capacity(2);
        if edge.is_forward() {
            entries.push((edge.base(), point.offset()));
        }
        if edge.is_backward() {
            entries.push((edge.adj(), edge.length() - point.offset()));
        }
        entries
    }
}

use super::network::{Network, PointId};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// 从起点到某个 tower point 的最短路
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub distance: f64,
    /// 完整的点序列, 不含起点, 含终点
    pub path: Vec<PointId>,
}

/// 单个 tower point 出发, 在距离阈值内可达的所有 tower point
#[derive(Debug, Clone, Default)]
pub struct ShortestPathEntry {
    routes: HashMap<PointId, Route>,
}

impl ShortestPathEntry {
    pub fn distance(&self, to: PointId) -> Option<f64> {
        self.routes.get(&to).map(|r| r.distance)
    }

    pub fn path(&self, to: PointId) -> Option<&[PointId]> {
        self.routes.get(&to).map(|r| r.path.as_slice())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// 有界 dijkstra: 只记录距离不超过 max_distance 的 tower point
pub fn bounded_dijkstra(network: &Network, src: PointId, max_distance: f64) -> ShortestPathEntry {
    let mut dist: HashMap<PointId, f64> = HashMap::from([(src, 0.0)]);
    let mut prev: HashMap<PointId, PointId> = HashMap::new();
    let mut routes: HashMap<PointId, Route> = HashMap::new();
    let mut queue = BinaryHeap::from([Reverse((OrderedFloat(0.0), src))]);

    while let Some(Reverse((OrderedFloat(d), node))) = queue.pop() {
        if routes.contains_key(&node) {
            continue;
        }
        if d > max_distance {
            break;
        }
        // 出队即确定最短距离, 路径由前驱的路径扩展得到
        let path = match prev.get(&node) {
            Some(from) => {
                let mut path = routes[from].path.clone();
                extend_hop(network, *from, node, &mut path);
                path
            }
            None => Vec::new(),
        };
        routes.insert(node, Route { distance: d, path });

        for (next, weight) in network.adjacent(node) {
            let nd = d + weight;
            if nd > max_distance || routes.contains_key(&next) {
                continue;
            }
            if nd < dist.get(&next).copied().unwrap_or(f64::INFINITY) {
                dist.insert(next, nd);
                prev.insert(next, node);
                queue.push(Reverse((OrderedFloat(nd), next)));
            }
        }
    }
    ShortestPathEntry { routes }
}

// 把 from -> to 这条 edge 上的插值点和 to 追加到路径
fn extend_hop(network: &Network, from: PointId, to: PointId, path: &mut Vec<PointId>) {
    if let Some(edge) = network.find_edge(from, to) {
        path.extend(network.pillars_between(edge, from, to));
    }
    path.push(to);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algorithm::{offset, Coord};
    use crate::graph::RawEdge;
    use crate::mm::Config;
    use approx::assert_relative_eq;

    // a -> b -> c -> d, 每段 400 米, 单向
    fn chain() -> (Network, Vec<Coord>) {
        let a = Coord::new(22.54, 114.05);
        let b = offset(&a, 400.0, 0.0);
        let c = offset(&b, 400.0, 0.0);
        let d = offset(&c, 400.0, 0.0);
        let raw = vec![
            RawEdge::new(vec![a, b], true, false),
            RawEdge::new(vec![b, c], true, false),
            RawEdge::new(vec![c, d], true, false),
        ];
        (Network::build(&raw, &Config::default()), vec![a, b, c, d])
    }

    #[test]
    fn test_bounded_horizon() {
        let (network, coords) = chain();
        let ids: Vec<PointId> = coords.iter().map(|c| network.find_point(c).unwrap()).collect();
        let entry = bounded_dijkstra(&network, ids[0], 1000.0);
        assert_eq!(entry.distance(ids[0]), Some(0.0));
        assert_relative_eq!(entry.distance(ids[2]).unwrap(), 800.0, epsilon = 1e-3);
        // 1200 米超出阈值
        assert_eq!(entry.distance(ids[3]), None);
        // 单向边不能反向到达
        let back = bounded_dijkstra(&network, ids[2], 1000.0);
        assert_eq!(back.distance(ids[0]), None);
        // 阈值为 0 时只有起点自身
        let alone = bounded_dijkstra(&network, ids[3], 0.0);
        assert_eq!(alone.len(), 1);
        assert_eq!(entry.len(), 3);
        assert!(!entry.is_empty());
    }

    #[test]
    fn test_path_contains_pillars() {
        let (network, coords) = chain();
        let ids: Vec<PointId> = coords.iter().map(|c| network.find_point(c).unwrap()).collect();
        let entry = bounded_dijkstra(&network, ids[0], 1000.0);
        let path = entry.path(ids[2]).unwrap();
        assert_eq!(*path.last().unwrap(), ids[2]);
        assert!(path.contains(&ids[1]));
        assert!(!path.contains(&ids[0]));
        // 400 米的边会被加密
        assert!(path.len() > 2);
        let mut prev = *network.point(ids[0]).coord();
        for id in path {
            let coord = *network.point(*id).coord();
            assert!(coord.lat > prev.lat);
            prev = coord;
        }
        assert!(entry.path(ids[0]).unwrap().is_empty());
    }
}

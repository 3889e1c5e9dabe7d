use super::network::{Network, PointId};
use crate::algorithm::{self, Coord};
use log::debug;
use rtree_rs::{RTree, Rect};

/// 所有 tower point 与 pillar point 的静态 R 树, 构建后只读
pub struct SpatialIndex {
    rtree: RTree<2, f64, PointId>,
    size: usize,
}

impl SpatialIndex {
    pub fn build(network: &Network) -> Self {
        let mut rtree = RTree::new();
        let mut size = 0;
        for id in network.indexed_points() {
            let coord = network.point(id).coord();
            rtree.insert(
                Rect::new([coord.lon, coord.lat], [coord.lon, coord.lat]),
                id,
            );
            size += 1;
        }
        debug!("build point rtree success, {} points", size);
        SpatialIndex { rtree, size }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// 查询以 center 为中心, radius 米为半径的包围盒内的所有点
    pub fn query(&self, center: &Coord, radius: f64) -> Vec<PointId> {
        let (min, max) = algorithm::bbox(center, radius);
        let bbox = Rect::new([min.lon, min.lat], [max.lon, max.lat]);
        let mut result: Vec<PointId> = self.rtree.search(bbox).map(|item| *item.data).collect();
        result.sort();
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algorithm::offset;
    use crate::graph::RawEdge;
    use crate::mm::Config;

    fn network() -> (Network, Coord) {
        let a = Coord::new(30.27, 120.15);
        let b = offset(&a, 600.0, 0.0);
        let c = offset(&b, 0.0, 600.0);
        let raw = vec![
            RawEdge::new(vec![a, b], true, true),
            RawEdge::new(vec![b, c], true, false),
        ];
        (Network::build(&raw, &Config::default()), a)
    }

    #[test]
    fn test_query_radius() {
        let (network, a) = network();
        let index = SpatialIndex::build(&network);
        assert_eq!(index.len(), network.points().len());
        let found = index.query(&offset(&a, 5.0, 5.0), 20.0);
        assert_eq!(found, vec![network.find_point(&a).unwrap()]);
        assert!(index.query(&offset(&a, -500.0, -500.0), 50.0).is_empty());
    }

    #[test]
    fn test_query_monotonic() {
        let (network, a) = network();
        let index = SpatialIndex::build(&network);
        let center = offset(&a, 250.0, 40.0);
        let mut prev: Vec<PointId> = Vec::new();
        for step in 0..30 {
            let found = index.query(&center, 10.0 + step as f64 * 25.0);
            assert!(prev.iter().all(|p| found.contains(p)));
            assert!(found.len() >= prev.len());
            prev = found;
        }
        assert!(!prev.is_empty());
    }
}

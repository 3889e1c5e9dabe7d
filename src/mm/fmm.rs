use super::model::{Candidate, Config, Layer, MMResult};
use super::traj::Trajectory;
use crate::algorithm::{self, Coord};
use crate::error::MatchError;
use crate::graph::{EdgeId, Network, PointId, RawEdge, RawNetwork, ShortestPathCache, SpatialIndex};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::{fs::File, io::BufReader};

/**
 * 基于预计算最短路的隐马尔可夫地图匹配
 * 路网, 最短路缓存和空间索引构建后只读, match_traj 可以在多个线程中同时调用。
 */
pub struct MMatch {
    network: Network,
    cache: ShortestPathCache,
    rtree: SpatialIndex,
    config: Config,
}

impl MMatch {
    pub fn new(raw_edges: &[RawEdge], config: Config) -> Self {
        let network = Network::build(raw_edges, &config);
        let cache = ShortestPathCache::compute_all(&network, config.max_distance);
        let rtree = SpatialIndex::build(&network);
        info!("construct map matching success... ");
        MMatch {
            network,
            cache,
            rtree,
            config,
        }
    }

    // from network file to map matching
    pub fn from_file(path: &str, config: Config) -> anyhow::Result<Self> {
        debug!("loading netwok from : {}", path);
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let geojson = geojson::GeoJson::from_reader(reader)?;
        let raw = RawNetwork::try_from(geojson)?;
        info!("load road network success file: {} ", path);
        Ok(MMatch::new(&raw.edges, config))
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// 过滤过密的轨迹点: 与前后点距离都小于两倍搜索半径的点被丢弃, 首尾点保留
    pub fn filter(&self, traj: &[Coord]) -> Result<Trajectory, MatchError> {
        let limit = self.config.search_range * 2.0;
        let mut result: Trajectory = Vec::with_capacity(traj.len());
        let last = traj.len().saturating_sub(1);
        for (i, point) in traj.iter().enumerate() {
            let keep = i == 0
                || i == last
                || result
                    .last()
                    .map_or(true, |prev| algorithm::distance(prev, point) > limit)
                || algorithm::distance(&traj[i + 1], point) > limit;
            if keep {
                result.push(*point);
            } else {
                debug!("{}th point has been filtered out", i + 1);
            }
        }
        if result.len() < 2 {
            return Err(MatchError::TrajectoryTooShort {
                remaining: result.len(),
            });
        }
        Ok(result)
    }

    /// 查询候选点, 找不到时逐步扩大半径; 输出概率已归一化
    pub fn query_candidate(&self, point: &Coord) -> Layer {
        if self.rtree.is_empty() {
            return Layer::new();
        }
        let mut radius = self.config.search_range;
        let found = loop {
            let found = self.rtree.query(point, radius);
            if !found.is_empty() {
                break found;
            }
            if let Some(max) = self.config.max_search_range {
                if radius >= max {
                    break found;
                }
            }
            radius += self.config.radius_step;
        };
        if radius > self.config.search_range {
            debug!("search radius expanded to {} for {:?}", radius, point);
        }

        let eps = self.calc_ep(point, &found);
        found
            .into_iter()
            .zip(eps)
            .map(|(id, ep)| Candidate {
                observation: *point,
                point: id,
                ep,
                prob: 0.0,
                prev: None,
            })
            .collect()
    }

    // calc ep, 同一观测点的候选点之间归一化
    fn calc_ep(&self, observation: &Coord, candidates: &[PointId]) -> Vec<f64> {
        let dists: Vec<f64> = candidates
            .iter()
            .map(|id| algorithm::distance(observation, self.network.point(*id).coord()))
            .collect();
        algorithm::gaussian_weights(&dists, self.config.sigma)
    }

    // 直线距离与最短路距离之比
    fn calc_tp(&self, from: PointId, to: PointId) -> f64 {
        let sp_dist = self.cache.distance(&self.network, from, to);
        if sp_dist == 0.0 {
            return 1.0;
        }
        let line_dist = algorithm::distance(
            self.network.point(from).coord(),
            self.network.point(to).coord(),
        );
        line_dist / sp_dist
    }

    // 第一层的概率由它到第二层的转移预先加权, 而不是只用输出概率
    fn seed(&self, first: &mut Layer, second: &Layer) {
        for pre in first.iter_mut() {
            let (ep, point) = (pre.ep, pre.point);
            pre.prob = second
                .iter()
                .map(|cur| ep * self.calc_tp(point, cur.point))
                .sum();
        }
        MMatch::normalize(first);
    }

    fn normalize(layer: &mut Layer) {
        let sum: f64 = layer.iter().map(|c| c.prob).sum();
        if sum > 0.0 {
            layer.iter_mut().for_each(|c| c.prob /= sum);
        }
    }
}

impl MMatch {
    pub fn match_traj(&self, traj: &[Coord]) -> Result<MMResult, MatchError> {
        let traj = self.filter(traj)?;
        let mut layers: Vec<Layer> = traj.iter().map(|p| self.query_candidate(p)).collect();
        for (index, layer) in layers.iter().enumerate() {
            if layer.is_empty() {
                warn!("no candidate found in {} gps point", index + 1);
                return Err(MatchError::NoViableMatch(format!(
                    "no candidate for point {}",
                    index
                )));
            }
        }

        let (first, rest) = layers.split_at_mut(1);
        self.seed(&mut first[0], &rest[0]);

        for i in 1..layers.len() {
            let (done, todo) = layers.split_at_mut(i);
            let prev_layer = &done[i - 1];
            let cur_layer = &mut todo[0];
            let mut max_prob = 0.0;
            for (j, pre) in prev_layer.iter().enumerate() {
                if pre.prob <= 0.0 {
                    continue;
                }
                for cur in cur_layer.iter_mut() {
                    let p = pre.prob * self.calc_tp(pre.point, cur.point) * cur.ep;
                    if p > cur.prob {
                        cur.prob = p;
                        cur.prev = Some(j);
                    }
                    if p > max_prob {
                        max_prob = p;
                    }
                }
            }
            if max_prob <= 0.0 {
                return Err(MatchError::NoViableMatch(format!(
                    "road is broken before point {}",
                    i
                )));
            }
            if max_prob < self.config.renormalize_floor {
                MMatch::normalize(cur_layer);
            }
        }

        self.back_tracking(&layers)
    }

    // 回溯
    fn back_tracking(&self, layers: &[Layer]) -> Result<MMResult, MatchError> {
        let last = layers
            .last()
            .and_then(|layer| {
                layer
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.prob > 0.0)
                    .fold(None, |best: Option<(usize, f64)>, (j, c)| match best {
                        Some((_, p)) if p >= c.prob => best,
                        _ => Some((j, c.prob)),
                    })
            })
            .ok_or_else(|| MatchError::NoViableMatch("no candidate in last layer".to_string()))?;

        let mut matched: Vec<PointId> = Vec::with_capacity(layers.len());
        let mut cursor = Some(last.0);
        for layer in layers.iter().rev() {
            let j = match cursor {
                Some(j) => j,
                None => break,
            };
            matched.push(layer[j].point);
            cursor = layer[j].prev;
        }
        matched.reverse();

        // 用最短路把候选点连接起来
        let mut route = vec![matched[0]];
        let mut length = 0.0;
        let mut pre = matched[0];
        for cur in matched.iter().skip(1) {
            if self.network.point(pre).key() == self.network.point(*cur).key() {
                continue;
            }
            let path = self.cache.path(&self.network, pre, *cur).ok_or_else(|| {
                MatchError::NoViableMatch(format!("no path between {:?} and {:?}", pre, cur))
            })?;
            length += self.cache.distance(&self.network, pre, *cur);
            route.extend(path);
            pre = *cur;
        }

        Ok(MMResult {
            length,
            points: self.matched_points(&route),
            edges: self.matched_edges(&route),
            route,
        })
    }

    fn matched_edges(&self, route: &[PointId]) -> Vec<EdgeId> {
        let mut edges: Vec<EdgeId> = Vec::new();
        for pair in route.windows(2) {
            let (pre, cur) = (pair[0], pair[1]);
            let edge = self
                .network
                .find_edge(pre, cur)
                .or_else(|| self.network.find_edge(cur, pre))
                .or_else(|| self.network.point(pre).edge())
                .or_else(|| self.network.point(cur).edge());
            if let Some(edge) = edge {
                if edges.last() != Some(&edge) {
                    edges.push(edge);
                }
            }
        }
        edges
    }

    // 只保留 tower point 以及首尾点
    fn matched_points(&self, route: &[PointId]) -> Vec<PointId> {
        let last = route.len() - 1;
        let mut points: Vec<PointId> = Vec::new();
        for (i, id) in route.iter().enumerate() {
            if i != 0 && i != last && !self.network.point(*id).is_tower() {
                continue;
            }
            let duplicated = points
                .last()
                .map_or(false, |p| self.network.point(*p).key() == self.network.point(*id).key());
            if !duplicated {
                points.push(*id);
            }
        }
        points
    }

    /// 并行匹配多条轨迹, 每条轨迹的结果相互独立
    pub fn match_all(&self, trajs: &[Trajectory]) -> Vec<Result<MMResult, MatchError>> {
        trajs.par_iter().map(|traj| self.match_traj(traj)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algorithm::offset;
    use crate::utils::log;
    use approx::assert_relative_eq;

    fn origin() -> Coord {
        Coord::new(31.23, 121.47)
    }

    // 3x3 的双向网格, 间距 200 米
    fn grid() -> MMatch {
        log::log_init();
        let o = origin();
        let node = |r: usize, c: usize| offset(&o, r as f64 * 200.0, c as f64 * 200.0);
        let mut raw = Vec::new();
        for r in 0..3 {
            for c in 0..3 {
                if c + 1 < 3 {
                    raw.push(RawEdge::new(vec![node(r, c), node(r, c + 1)], true, true));
                }
                if r + 1 < 3 {
                    raw.push(RawEdge::new(vec![node(r, c), node(r + 1, c)], true, true));
                }
            }
        }
        MMatch::new(&raw, Config::default())
    }

    fn noisy_traj() -> Trajectory {
        let o = origin();
        vec![
            offset(&o, 8.0, -5.0),
            offset(&o, 6.0, 130.0),
            offset(&o, -7.0, 260.0),
            offset(&o, 120.0, 396.0),
            offset(&o, 250.0, 405.0),
            offset(&o, 395.0, 330.0),
        ]
    }

    #[test]
    fn test_filter_dense_points() {
        let mm = grid();
        let o = origin();
        let dense: Vec<Coord> = (0..4).map(|i| offset(&o, 0.0, i as f64 * 10.0)).collect();
        let filtered = mm.filter(&dense).unwrap();
        assert_eq!(filtered, vec![dense[0], dense[3]]);

        let sparse: Vec<Coord> = (0..4).map(|i| offset(&o, 0.0, i as f64 * 150.0)).collect();
        assert_eq!(mm.filter(&sparse).unwrap().len(), 4);
    }

    #[test]
    fn test_filter_too_short() {
        let mm = grid();
        assert_eq!(
            mm.filter(&[origin()]),
            Err(MatchError::TrajectoryTooShort { remaining: 1 })
        );
        assert_eq!(
            mm.match_traj(&[]),
            Err(MatchError::TrajectoryTooShort { remaining: 0 })
        );
    }

    #[test]
    fn test_emission_normalized() {
        let mm = grid();
        for point in noisy_traj() {
            let candidates = mm.query_candidate(&point);
            assert!(!candidates.is_empty());
            let sum: f64 = candidates.iter().map(|c| c.ep).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_emission_far_from_road() {
        log::log_init();
        let a = origin();
        let b = offset(&a, 0.0, 300.0);
        let mm = MMatch::new(&[RawEdge::new(vec![a, b], true, true)], Config::default());
        let ta = mm.network.find_point(&a).unwrap();
        let tb = mm.network.find_point(&b).unwrap();

        // 2 公里外, 高斯密度本身已经下溢
        let far = offset(&a, 2000.0, 0.0);
        let candidates = mm.query_candidate(&far);
        assert!(candidates.len() > 2);
        let sum: f64 = candidates.iter().map(|c| c.ep).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
        let best = candidates
            .iter()
            .max_by(|x, y| x.ep.total_cmp(&y.ep))
            .unwrap();
        assert_eq!(best.point, ta);
        let nearest = candidates.iter().find(|c| c.point == ta).unwrap();
        assert!(candidates
            .iter()
            .filter(|c| c.point != ta)
            .all(|c| c.ep < nearest.ep));

        let result = mm
            .match_traj(&[far, offset(&b, 2000.0, 0.0)])
            .unwrap();
        assert_eq!(result.points, vec![ta, tb]);
        assert_relative_eq!(result.length, 300.0, epsilon = 1e-3);
    }

    #[test]
    fn test_search_radius_expands() {
        let mm = grid();
        // 网格外 150 米, 初始半径内没有点
        let far = offset(&origin(), -150.0, -150.0);
        assert!(mm.rtree.query(&far, mm.config.search_range).is_empty());
        let candidates = mm.query_candidate(&far);
        assert!(!candidates.is_empty());
        let nearest = mm.network.find_point(&origin()).unwrap();
        assert!(candidates.iter().any(|c| c.point == nearest));
    }

    #[test]
    fn test_seed_pass_weights_first_layer_by_next_step() {
        // 与教科书 viterbi 不同: 第一层的初始概率乘上了到第二层的转移概率
        let mm = grid();
        let o = origin();
        let mut first = mm.query_candidate(&o);
        let second = mm.query_candidate(&offset(&o, 0.0, 200.0));
        mm.seed(&mut first, &second);
        let sum: f64 = first.iter().map(|c| c.prob).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
        for c in first.iter() {
            let expected: f64 = second.iter().map(|n| c.ep * mm.calc_tp(c.point, n.point)).sum();
            assert!(expected > 0.0);
            assert!(c.prob > 0.0);
        }
    }

    #[test]
    fn test_transition_same_point() {
        let mm = grid();
        let a = mm.network.find_point(&origin()).unwrap();
        assert_eq!(mm.calc_tp(a, a), 1.0);
    }

    #[test]
    fn test_match_idempotent() {
        let mm = grid();
        let traj = noisy_traj();
        let first = mm.match_traj(&traj).unwrap();
        let second = mm.match_traj(&traj).unwrap();
        assert_eq!(first, second);
        assert!(first.length > 0.0);
        assert!(!first.edges.is_empty());
        assert!(first.points.len() >= 2);
    }

    #[test]
    fn test_match_all_parallel() {
        let mm = grid();
        let o = origin();
        let trajs = vec![
            noisy_traj(),
            vec![o],
            vec![offset(&o, 3.0, 2.0), offset(&o, 398.0, 4.0)],
        ];
        let results = mm.match_all(&trajs);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], mm.match_traj(&trajs[0]));
        assert!(matches!(results[1], Err(MatchError::TrajectoryTooShort { .. })));
        let straight = results[2].as_ref().unwrap();
        assert_relative_eq!(straight.length, 400.0, epsilon = 1e-3);
    }

    #[test]
    fn test_matched_points_keep_towers() {
        let mm = grid();
        let result = mm.match_traj(&noisy_traj()).unwrap();
        let last = result.points.len() - 1;
        for (i, id) in result.points.iter().enumerate() {
            if i != 0 && i != last {
                assert!(mm.network.point(*id).is_tower());
            }
        }
        for pair in result.points.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        for pair in result.edges.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert_eq!(result.route.first(), result.points.first());
        assert_eq!(result.route.last(), result.points.last());
    }
}

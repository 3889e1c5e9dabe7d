use crate::algorithm::{self, Coord};
use crate::error::NetworkError;
use crate::mm::Config;
use anyhow::Result;
use log::{debug, info, warn};
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
/**
 * @file network.rs
 * 定义路网信息结构体
 * 由原始道路几何构建虚拟图: tower point 为路网节点, pillar point 为 edge 上的插值点。
 */

/// 坐标取整精度 (1e-7 度, 约 1cm)
const KEY_SCALE: f64 = 1e7;

/// 点的值语义标识: 取整后的经纬度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointKey(i64, i64);

impl From<&Coord> for PointKey {
    fn from(coord: &Coord) -> Self {
        PointKey(
            (coord.lat * KEY_SCALE).round() as i64,
            (coord.lon * KEY_SCALE).round() as i64,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointKind {
    Tower,
    Pillar {
        edge: EdgeId, // 所属的 edge
        offset: f64,  // 沿 edge 到 base point 的距离
    },
}

#[derive(Debug, Clone)]
pub struct Point {
    coord: Coord,
    key: PointKey,
    kind: PointKind,
}

impl Point {
    fn new(coord: Coord, kind: PointKind) -> Self {
        Point {
            coord,
            key: PointKey::from(&coord),
            kind,
        }
    }

    pub fn coord(&self) -> &Coord {
        &self.coord
    }

    pub fn key(&self) -> PointKey {
        self.key
    }

    pub fn is_tower(&self) -> bool {
        matches!(self.kind, PointKind::Tower)
    }

    /// pillar point 所属的 edge
    pub fn edge(&self) -> Option<EdgeId> {
        match self.kind {
            PointKind::Pillar { edge, .. } => Some(edge),
            PointKind::Tower => None,
        }
    }

    /// pillar point 到 base point 的距离, tower point 为 0
    pub fn offset(&self) -> f64 {
        match self.kind {
            PointKind::Pillar { offset, .. } => offset,
            PointKind::Tower => 0.0,
        }
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Point {}

impl Hash for Point {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    base: PointId,        // 起点 tower point
    adj: PointId,         // 终点 tower point
    pillars: Vec<PointId>, // 从 base 到 adj 的有序插值点
    length: f64,          // edge 的长度 米制单位
    forward: bool,        // 允许 base -> adj
    backward: bool,       // 允许 adj -> base
}

impl Edge {
    pub fn base(&self) -> PointId {
        self.base
    }

    pub fn adj(&self) -> PointId {
        self.adj
    }

    pub fn pillars(&self) -> &[PointId] {
        &self.pillars
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn is_forward(&self) -> bool {
        self.forward
    }

    pub fn is_backward(&self) -> bool {
        self.backward
    }
}

/// 外部提供的原始道路几何
#[derive(Debug, Clone)]
pub struct RawEdge {
    pub geometry: Vec<Coord>,
    pub forward: bool,
    pub backward: bool,
}

impl RawEdge {
    pub fn new(geometry: Vec<Coord>, forward: bool, backward: bool) -> Self {
        RawEdge {
            geometry,
            forward,
            backward,
        }
    }
}

// 拆分后的 tower 到 tower 的逻辑边, 还未去重和加密
struct Segment {
    base: PointId,
    adj: PointId,
    pillars: Vec<Coord>,
    length: f64,
    forward: bool,
    backward: bool,
}

pub struct Network {
    points: Vec<Point>,                           // 所有的点, tower point 在前
    edges: Vec<Edge>,                             // 去重后的 edge
    points_index: HashMap<PointKey, PointId>,     // 坐标对应的点
    edges_index: HashMap<(PointId, PointId), EdgeId>, // 有向 (base, adj) 对应的 edge
    graph: Graph<PointId, f64, Directed, usize>,  // tower point 的邻接图
}

impl Network {
    /// 由原始几何构建路网, 格式错误的 edge 会被跳过
    pub fn build(raw_edges: &[RawEdge], config: &Config) -> Self {
        info!("start construct road network from {} raw edges...", raw_edges.len());
        let valid: Vec<&RawEdge> = raw_edges
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                if raw.geometry.len() < 2 {
                    let err = NetworkError::MalformedGeometry {
                        index,
                        points: raw.geometry.len(),
                    };
                    warn!("skip edge: {}", err);
                    return None;
                }
                if !raw.forward && !raw.backward {
                    debug!("skip edge {}: not traversable", index);
                    return None;
                }
                Some(raw)
            })
            .collect();

        let mut network = Network {
            points: Vec::new(),
            edges: Vec::new(),
            points_index: HashMap::new(),
            edges_index: HashMap::new(),
            graph: Graph::default(),
        };
        network.add_towers(&valid);
        let segments = network.split_segments(&valid);
        network.add_edges(segments, config.search_range);

        info!(
            "finish construct road network: {} tower points, {} points, {} edges",
            network.graph.node_count(),
            network.points.len(),
            network.edges.len()
        );
        network
    }

    // 端点和被多条 edge 共享的坐标作为 tower point
    fn add_towers(&mut self, raw_edges: &[&RawEdge]) {
        let mut shared: HashMap<PointKey, usize> = HashMap::new();
        for raw in raw_edges {
            let mut keys: Vec<PointKey> = raw.geometry.iter().map(PointKey::from).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                *shared.entry(key).or_insert(0) += 1;
            }
        }
        for raw in raw_edges {
            let last = raw.geometry.len() - 1;
            for (i, coord) in raw.geometry.iter().enumerate() {
                let key = PointKey::from(coord);
                if i == 0 || i == last || shared.get(&key).copied().unwrap_or(0) > 1 {
                    self.add_tower(*coord);
                }
            }
        }
    }

    fn add_tower(&mut self, coord: Coord) -> PointId {
        let key = PointKey::from(&coord);
        if let Some(id) = self.points_index.get(&key) {
            return *id;
        }
        // tower point 的 PointId 与图中的 NodeIndex 一一对应
        let id = PointId(self.points.len());
        self.points.push(Point::new(coord, PointKind::Tower));
        self.points_index.insert(key, id);
        let node = self.graph.add_node(id);
        debug_assert_eq!(node.index(), id.0);
        id
    }

    fn tower_at(&self, coord: &Coord) -> Option<PointId> {
        self.points_index
            .get(&PointKey::from(coord))
            .copied()
            .filter(|id| self.points[id.0].is_tower())
    }

    // 沿折线遇到 tower point 即切分
    fn split_segments(&self, raw_edges: &[&RawEdge]) -> Vec<Segment> {
        let mut segments = Vec::new();
        for raw in raw_edges {
            let mut base = match self.tower_at(&raw.geometry[0]) {
                Some(id) => id,
                None => continue,
            };
            let mut pillars: Vec<Coord> = Vec::new();
            let mut prev_key = PointKey::from(&raw.geometry[0]);
            for coord in &raw.geometry[1..] {
                let key = PointKey::from(coord);
                if key == prev_key {
                    continue;
                }
                prev_key = key;
                match self.tower_at(coord) {
                    Some(adj) => {
                        if adj == base {
                            debug!("drop self loop at {:?}", self.points[base.0].coord);
                        } else {
                            let mut line = Vec::with_capacity(pillars.len() + 2);
                            line.push(self.points[base.0].coord);
                            line.extend_from_slice(&pillars);
                            line.push(*coord);
                            segments.push(Segment {
                                base,
                                adj,
                                pillars: std::mem::take(&mut pillars),
                                length: algorithm::linestring_distance(&line),
                                forward: raw.forward,
                                backward: raw.backward,
                            });
                        }
                        pillars.clear();
                        base = adj;
                    }
                    None => pillars.push(*coord),
                }
            }
        }
        segments
    }

    // 同一对 tower point 之间只保留最短的 edge, 然后加密并建立索引
    fn add_edges(&mut self, segments: Vec<Segment>, search_range: f64) {
        let mut owners: HashMap<(PointId, PointId), usize> = HashMap::new();
        let mut claim = |key: (PointId, PointId), index: usize, segments: &[Segment]| {
            match owners.get(&key) {
                Some(old) if segments[*old].length <= segments[index].length => {}
                _ => {
                    owners.insert(key, index);
                }
            }
        };
        for (index, segment) in segments.iter().enumerate() {
            if segment.forward {
                claim((segment.base, segment.adj), index, &segments);
            }
            if segment.backward {
                claim((segment.adj, segment.base), index, &segments);
            }
        }

        let dropped = segments.len();
        for (index, segment) in segments.into_iter().enumerate() {
            let forward = segment.forward && owners.get(&(segment.base, segment.adj)) == Some(&index);
            let backward =
                segment.backward && owners.get(&(segment.adj, segment.base)) == Some(&index);
            if !forward && !backward {
                continue;
            }
            self.add_edge(segment, forward, backward, search_range);
        }
        debug!(
            "{} duplicated edges dropped",
            dropped - self.edges.len()
        );
    }

    fn add_edge(&mut self, segment: Segment, forward: bool, backward: bool, search_range: f64) {
        let base = self.points[segment.base.0].coord;
        let adj = self.points[segment.adj.0].coord;
        let pillars = densify(&base, &adj, segment.pillars, forward, backward, search_range);

        let edge_id = EdgeId(self.edges.len());
        let mut ids = Vec::with_capacity(pillars.len());
        let mut length = 0.0;
        let mut prev = base;
        for coord in pillars {
            length += algorithm::distance(&prev, &coord);
            prev = coord;
            let id = PointId(self.points.len());
            self.points.push(Point::new(
                coord,
                PointKind::Pillar {
                    edge: edge_id,
                    offset: length,
                },
            ));
            self.points_index.entry(PointKey::from(&coord)).or_insert(id);
            ids.push(id);
        }
        length += algorithm::distance(&prev, &adj);

        if forward {
            self.edges_index.insert((segment.base, segment.adj), edge_id);
            self.graph.add_edge(
                NodeIndex::new(segment.base.0),
                NodeIndex::new(segment.adj.0),
                length,
            );
        }
        if backward {
            self.edges_index.insert((segment.adj, segment.base), edge_id);
            self.graph.add_edge(
                NodeIndex::new(segment.adj.0),
                NodeIndex::new(segment.base.0),
                length,
            );
        }
        self.edges.push(Edge {
            base: segment.base,
            adj: segment.adj,
            pillars: ids,
            length,
            forward,
            backward,
        });
    }
}

/// 加密 edge 上的插值点, 保证可通行方向上相邻两点的间隔不超过 1.5 倍搜索半径
pub fn densify(
    base: &Coord,
    adj: &Coord,
    mut pillars: Vec<Coord>,
    forward: bool,
    backward: bool,
    search_range: f64,
) -> Vec<Coord> {
    let max_gap = search_range * 1.5;
    if pillars.is_empty() && algorithm::distance(base, adj) > search_range * 2.0 {
        pillars.push(algorithm::midpoint(base, adj));
    }
    if forward {
        pillars.push(*adj);
        let mut pre = *base;
        let mut i = 0;
        while i < pillars.len() {
            if algorithm::distance(&pre, &pillars[i]) > max_gap {
                let mid = algorithm::midpoint(&pre, &pillars[i]);
                pillars.insert(i, mid);
            } else {
                pre = pillars[i];
                i += 1;
            }
        }
        pillars.pop();
    }
    if backward {
        pillars.insert(0, *base);
        let mut pre = *adj;
        let mut i = pillars.len();
        while i > 0 {
            if algorithm::distance(&pre, &pillars[i - 1]) > max_gap {
                let mid = algorithm::midpoint(&pre, &pillars[i - 1]);
                // 插入到 pillars[i-1] 与 pre 之间, 下一轮检查 pre 与中点
                pillars.insert(i, mid);
                i += 1;
            } else {
                pre = pillars[i - 1];
                i -= 1;
            }
        }
        pillars.remove(0);
    }
    pillars
}

impl Network {
    pub fn point(&self, id: PointId) -> &Point {
        &self.points[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn tower_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn towers(&self) -> impl Iterator<Item = PointId> {
        (0..self.tower_count()).map(PointId)
    }

    /// 按坐标查找点
    pub fn find_point(&self, coord: &Coord) -> Option<PointId> {
        self.points_index.get(&PointKey::from(coord)).copied()
    }

    /// 查找有向 edge: from -> to
    pub fn find_edge(&self, from: PointId, to: PointId) -> Option<EdgeId> {
        self.edges_index.get(&(from, to)).copied()
    }

    /// tower point 可直接到达的 tower point 及 edge 长度
    pub fn adjacent(&self, tower: PointId) -> impl Iterator<Item = (PointId, f64)> + '_ {
        self.graph
            .edges(NodeIndex::new(tower.0))
            .map(|e| (self.graph[e.target()], *e.weight()))
    }

    /// 进入空间索引的点 (每个坐标一个)
    pub fn indexed_points(&self) -> impl Iterator<Item = PointId> + '_ {
        self.points
            .iter()
            .enumerate()
            .map(|(index, _)| PointId(index))
            .filter(|id| self.points_index.get(&self.points[id.0].key) == Some(id))
    }

    /// 沿 edge 从 from 到 to 的插值点, 不含 from 与 to, 按行进方向排列
    /// from 或 to 不在该 edge 上时返回空
    pub fn pillars_between(&self, edge: EdgeId, from: PointId, to: PointId) -> Vec<PointId> {
        let edge = &self.edges[edge.0];
        // base 在 0, pillars 依次在 1..=n, adj 在 n + 1
        let position = |id: PointId| -> Option<usize> {
            if id == edge.base {
                Some(0)
            } else if id == edge.adj {
                Some(edge.pillars.len() + 1)
            } else {
                edge.pillars.iter().position(|p| *p == id).map(|i| i + 1)
            }
        };
        let (a, b) = match (position(from), position(to)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                debug!("{:?} or {:?} is not on edge {:?}", from, to, edge);
                return Vec::new();
            }
        };
        if a < b {
            edge.pillars[a..b - 1].to_vec()
        } else if a > b {
            edge.pillars[b..a - 1].iter().rev().copied().collect()
        } else {
            Vec::new()
        }
    }
}

/// 从文件中读取的原始路网
pub struct RawNetwork {
    pub edges: Vec<RawEdge>,
}

impl TryFrom<geojson::GeoJson> for RawNetwork {
    type Error = anyhow::Error;
    fn try_from(value: geojson::GeoJson) -> std::result::Result<Self, Self::Error> {
        let mut edges = Vec::new();
        match value {
            geojson::GeoJson::FeatureCollection(feature_collection) => {
                for feature in feature_collection.features {
                    let geometry = feature
                        .geometry
                        .ok_or_else(|| anyhow::anyhow!("feature without geometry"))?;
                    let line = match geometry.value {
                        geojson::Value::LineString(line) => line,
                        _ => return Err(anyhow::anyhow!("geometry is not linestring")),
                    };
                    let properties = feature.properties.unwrap_or_default();
                    let flag = |name: &str| properties.get(name).and_then(|v| v.as_bool());
                    let oneway = flag("oneway").unwrap_or(false);
                    let forward = flag("forward").unwrap_or(true);
                    let backward = flag("backward").unwrap_or(!oneway);
                    edges.push(RawEdge {
                        geometry: positions_to_coords(&line)?,
                        forward,
                        backward,
                    });
                }
            }
            _ => {
                return Err(anyhow::anyhow!("not a feature collection"));
            }
        }
        Ok(RawNetwork { edges })
    }
}

/// geojson 的坐标顺序为 [lon, lat]
pub fn positions_to_coords(positions: &[geojson::Position]) -> Result<Vec<Coord>> {
    positions
        .iter()
        .map(|p| match p.as_slice() {
            [lon, lat, ..] => Ok(Coord::new(*lat, *lon)),
            _ => Err(anyhow::anyhow!("invalid position {:?}", p)),
        })
        .collect()
}

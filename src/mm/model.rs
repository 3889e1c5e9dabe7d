use crate::algorithm::Coord;
use crate::graph::{EdgeId, PointId};

/**
 * 定义mm需要的一些结构体
 * */

// 每个观测点可能匹配到的路网上的点
#[derive(Debug, Clone)]
pub struct Candidate {
    pub observation: Coord, // 原始 gps 点
    pub point: PointId,     // 路网上的候选点
    pub ep: f64,            // 归一化后的输出概率
    pub prob: f64,          // 累积概率
    pub prev: Option<usize>, // 上一层中最优前驱的下标
}

pub type Layer = Vec<Candidate>;

#[derive(Debug, Clone, PartialEq)]
pub struct MMResult {
    pub length: f64,          // 匹配路径的总长度 米
    pub points: Vec<PointId>, // tower point 加首尾点
    pub edges: Vec<EdgeId>,   // 经过的 edge
    pub route: Vec<PointId>,  // 完整的点序列
}

#[derive(Debug, Clone)]
pub struct Config {
    pub max_distance: f64,           // 最短路缓存的距离阈值
    pub search_range: f64,           // 候选点搜索半径, 也是加密的基本单位
    pub radius_step: f64,            // 找不到候选点时每次扩大的半径
    pub max_search_range: Option<f64>, // 搜索半径上限, None 表示不设上限
    pub sigma: f64,                  // gps 误差的标准差
    pub renormalize_floor: f64,      // 最大概率低于该值时重新归一化
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_distance: 1000.0,
            search_range: 50.0,
            radius_step: 10.0,
            max_search_range: None,
            sigma: 50.0,
            renormalize_floor: 1e-150,
        }
    }
}

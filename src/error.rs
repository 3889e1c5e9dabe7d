use thiserror::Error;

/// 构建路网时的错误, 只影响单条 edge
#[derive(Error, Debug, PartialEq, Clone)]
pub enum NetworkError {
    #[error("raw edge {index} has {points} points, at least 2 required")]
    MalformedGeometry { index: usize, points: usize },
}

/// 单条轨迹匹配失败, 不影响其他轨迹
#[derive(Error, Debug, PartialEq, Clone)]
pub enum MatchError {
    #[error("trajectory too short: {remaining} points left after filtering")]
    TrajectoryTooShort { remaining: usize },
    #[error("no viable match: {0}")]
    NoViableMatch(String),
}

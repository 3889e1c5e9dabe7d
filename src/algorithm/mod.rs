use geo::algorithm::haversine_distance::HaversineDistance;

/// 地球平均半径, 与 geo 的 haversine 保持一致
pub const EARTH_RADIUS: f64 = 6_371_008.8;

/// 一个纬度对应的米数
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS * std::f64::consts::PI / 180.0;

const MIN_LON_SCALE: f64 = 1e-6;

/// 经纬度坐标, 单位为度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coord { lat, lon }
    }

    fn to_geo(self) -> geo::Point<f64> {
        geo::Point::new(self.lon, self.lat)
    }
}

/// 计算两点之间的半正弦距离 (米)
pub fn distance(a: &Coord, b: &Coord) -> f64 {
    a.to_geo().haversine_distance(&b.to_geo())
}

/// 折线的总长度
pub fn linestring_distance(line: &[Coord]) -> f64 {
    line.windows(2).map(|w| distance(&w[0], &w[1])).sum()
}

/// 两点经纬度的算术中点
pub fn midpoint(a: &Coord, b: &Coord) -> Coord {
    Coord::new((a.lat + b.lat) / 2.0, (a.lon + b.lon) / 2.0)
}

/// 以米为单位向北/向东平移坐标 (小范围近似)
pub fn offset(origin: &Coord, north: f64, east: f64) -> Coord {
    let lat = origin.lat + north / METERS_PER_DEGREE;
    // 两极附近 cos 趋于 0, 限制下限使经度跨度有界
    let scale = origin.lat.to_radians().cos().max(MIN_LON_SCALE);
    let lon = origin.lon + east / (METERS_PER_DEGREE * scale);
    Coord::new(lat, lon)
}

/// 半径对应的经纬度包围盒, 返回 (min, max)
pub fn bbox(center: &Coord, radius: f64) -> (Coord, Coord) {
    (
        offset(center, -radius, -radius),
        offset(center, radius, radius),
    )
}

/// 一组距离的正态分布密度, 归一化到和为 1
/// 指数以最小距离为基准平移, 常数因子在归一化时消去, 距离很大时也不会全部下溢为 0
pub fn gaussian_weights(distances: &[f64], sigma: f64) -> Vec<f64> {
    let min = distances.iter().copied().fold(f64::INFINITY, f64::min);
    let weights: Vec<f64> = distances
        .iter()
        .map(|d| (-(d * d - min * min) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

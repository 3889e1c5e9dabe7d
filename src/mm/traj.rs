use crate::algorithm::Coord;
use crate::graph::positions_to_coords;

/// 一条 gps 轨迹, 按时间排序
pub type Trajectory = Vec<Coord>;

pub struct MultiTrajectory {
    pub trajs: Vec<Trajectory>,
}

// 只支持 LineString 与 MultiPoint
fn geometry_to_traj(geometry: Option<geojson::Geometry>) -> anyhow::Result<Trajectory> {
    let geometry = geometry.ok_or_else(|| anyhow::anyhow!("feature without geometry"))?;
    match geometry.value {
        geojson::Value::LineString(line) => positions_to_coords(&line),
        geojson::Value::MultiPoint(multi_points) => positions_to_coords(&multi_points),
        _ => Err(anyhow::anyhow!(
            "geometry only support LineString, MultiPoint"
        )),
    }
}

// 实现轨迹转换trait
impl TryFrom<geojson::GeoJson> for MultiTrajectory {
    type Error = anyhow::Error;
    fn try_from(value: geojson::GeoJson) -> Result<Self, Self::Error> {
        let trajs = match value {
            geojson::GeoJson::FeatureCollection(fc) => fc
                .features
                .into_iter()
                .map(|feature| geometry_to_traj(feature.geometry))
                .collect::<anyhow::Result<Vec<_>>>()?,
            geojson::GeoJson::Feature(feature) => vec![geometry_to_traj(feature.geometry)?],
            geojson::GeoJson::Geometry(geom) => vec![geometry_to_traj(Some(geom))?],
        };
        Ok(MultiTrajectory { trajs })
    }
}

impl TryFrom<wkt::Wkt<f64>> for MultiTrajectory {
    type Error = anyhow::Error;
    fn try_from(value: wkt::Wkt<f64>) -> Result<Self, Self::Error> {
        let traj = match value.item {
            wkt::Geometry::LineString(line) => line
                .0
                .into_iter()
                .map(|point| Coord::new(point.y, point.x))
                .collect(),
            wkt::Geometry::MultiPoint(multi_points) => multi_points
                .0
                .into_iter()
                .filter_map(|point| point.0.map(|c| Coord::new(c.y, c.x)))
                .collect(),
            _ => {
                return Err(anyhow::anyhow!("wkt only support LineString, MultiPoint"));
            }
        };
        Ok(MultiTrajectory { trajs: vec![traj] })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_traj_from_geojson() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "LineString", "coordinates": [[116.40, 39.90], [116.41, 39.91]]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "MultiPoint", "coordinates": [[116.40, 39.90], [116.42, 39.92], [116.43, 39.93]]}}
            ]
        }"#;
        let geojson: geojson::GeoJson = text.parse().unwrap();
        let trajs = MultiTrajectory::try_from(geojson).unwrap().trajs;
        assert_eq!(trajs.len(), 2);
        assert_eq!(trajs[0][1], Coord::new(39.91, 116.41));
        assert_eq!(trajs[1].len(), 3);
    }

    #[test]
    fn test_traj_from_geojson_rejects_polygon() {
        let text = r#"{"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]}"#;
        let geojson: geojson::GeoJson = text.parse().unwrap();
        assert!(MultiTrajectory::try_from(geojson).is_err());
    }

    #[test]
    fn test_traj_from_wkt() {
        let wkt: wkt::Wkt<f64> = "LINESTRING(116.40 39.90, 116.41 39.91, 116.42 39.92)"
            .parse()
            .unwrap();
        let trajs = MultiTrajectory::try_from(wkt).unwrap().trajs;
        assert_eq!(trajs.len(), 1);
        assert_eq!(trajs[0][0], Coord::new(39.90, 116.40));
        assert_eq!(trajs[0].len(), 3);

        let wkt: wkt::Wkt<f64> = "MULTIPOINT((116.40 39.90), (116.41 39.91))".parse().unwrap();
        let trajs = MultiTrajectory::try_from(wkt).unwrap().trajs;
        assert_eq!(trajs[0].len(), 2);
    }
}

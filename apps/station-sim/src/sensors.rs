use rand::Rng;

const DRIFT: f64 = 0.001;
const JITTER: f64 = 0.005;
const WIND_DIRECTION_NOISE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorKind {
    Temperature,
    AirHumidity,
    WindDirection,
    Pressure,
    WindSpeed,
    SolarRadiation,
    Uv,
    PrecipitationRate,
    SoilHumidity,
}

impl SensorKind {
    pub const ALL: [SensorKind; 9] = [
        SensorKind::Temperature,
        SensorKind::AirHumidity,
        SensorKind::WindDirection,
        SensorKind::Pressure,
        SensorKind::WindSpeed,
        SensorKind::SolarRadiation,
        SensorKind::Uv,
        SensorKind::PrecipitationRate,
        SensorKind::SoilHumidity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::AirHumidity => "air_humidity",
            SensorKind::WindDirection => "wind_direction",
            SensorKind::Pressure => "pressure",
            SensorKind::WindSpeed => "wind_speed",
            SensorKind::SolarRadiation => "solar_radiation",
            SensorKind::Uv => "uv",
            SensorKind::PrecipitationRate => "precipitation_rate",
            SensorKind::SoilHumidity => "soil_humidity",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn base_value(self) -> f64 {
        match self {
            SensorKind::Temperature => 20.0,
            SensorKind::AirHumidity => 60.0,
            SensorKind::WindDirection => 90.0,
            SensorKind::Pressure => 1013.0,
            SensorKind::WindSpeed => 90.0,
            SensorKind::SolarRadiation => 200.0,
            SensorKind::Uv => 5.0,
            SensorKind::PrecipitationRate => 0.0,
            SensorKind::SoilHumidity => 30.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sensor {
    kind: SensorKind,
    base_value: f64,
}

impl Sensor {
    pub fn new(kind: SensorKind) -> Self {
        Self {
            kind,
            base_value: kind.base_value(),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn base_value(&self) -> f64 {
        self.base_value
    }

    /// Samples the sensor, rounded to two decimals.
    ///
    /// Linear sensors drift their base by a small random walk and never report
    /// below zero. Wind direction keeps its base and reports within `[0, 360)`,
    /// including samples that round up to 360.
    pub fn read<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        match self.kind {
            SensorKind::WindDirection => {
                let jitter = rng.gen_range(-WIND_DIRECTION_NOISE..WIND_DIRECTION_NOISE);
                wrap_degrees(round2(self.base_value + jitter))
            }
            _ => {
                self.base_value = (self.base_value + rng.gen_range(-DRIFT..DRIFT)).max(0.0);
                round2((self.base_value + rng.gen_range(-JITTER..JITTER)).max(0.0))
            }
        }
    }

    pub fn set_value(&mut self, value: f64) {
        self.base_value = value.max(0.0);
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn wrap_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // Negative zero and values a hair under zero land on 360 or -0.
    if wrapped >= 360.0 || wrapped == 0.0 {
        0.0
    } else {
        wrapped
    }
}

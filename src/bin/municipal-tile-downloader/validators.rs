use municipal_tile_downloader::Crs;

pub fn is_numeric_min(min: u64) -> impl Fn(String) -> Result<(), String> {
    move |v: String| {
        let val = v.parse::<u64>().map_err(|_| "must be numeric".to_owned())?;

        if val < min {
            return Err(format!("must be >= {}", min));
        }

        Ok(())
    }
}

pub fn is_positive_length(v: String) -> Result<(), String> {
    let val = v.parse::<f64>().map_err(|_| "must be numeric".to_owned())?;

    if !(val > 0.0) || !val.is_finite() {
        return Err("must be > 0".to_owned());
    }

    Ok(())
}

pub fn is_crs(v: String) -> Result<(), String> {
    v.parse::<Crs>()
        .map(|_| ())
        .map_err(|_| "must be an EPSG code such as EPSG:6455".to_owned())
}

pub fn is_non_empty(v: String) -> Result<(), String> {
    if v.trim().is_empty() {
        return Err("must not be empty".to_owned());
    }

    Ok(())
}

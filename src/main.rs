#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    lead_import::init_logger();
    log::info!("starting lead import service");
    lead_import::rocket()
}

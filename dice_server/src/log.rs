// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::options::Options;

pub(crate) fn init_logger(options: &Options) {
    let mut logger = env_logger::builder();
    logger.format_timestamp(None);
    logger.filter_module("dice_server", options.debug_game);
    logger.filter_module("dice_server::entry_point", options.debug_http);
    logger.filter_module("dice_server::world", options.debug_engine);
    logger.filter_module("dice_server::wire", options.debug_engine);
    logger.init();
}
